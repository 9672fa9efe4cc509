//! Order management entry point.

use std::process::ExitCode;

use order_management::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // 1. Initialize tracing
    if let Err(error) = order_management::init_tracing(&config) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = match order_management::install_metrics() {
        Ok(handle) => handle,
        Err(error) => {
            tracing::error!(%error, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    // 3. Place the order
    let result = order_management::run(&config).await;
    tracing::debug!(metrics = %metrics_handle.render(), "final metrics");

    match result {
        Ok(outcome) if outcome.is_completed() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(error) => {
            tracing::error!(%error, "order did not finish");
            ExitCode::FAILURE
        }
    }
}
