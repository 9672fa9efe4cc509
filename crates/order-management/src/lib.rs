//! Runnable order-fulfillment saga with structured logging and Prometheus
//! metrics.
//!
//! [`run`] wires a [`SagaSystem`] over the configured event store and places
//! one order end to end.

pub mod config;
pub mod error;

use domain::{Inventory, Payment, PaymentPolicy, StockPolicy};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use saga::{OrderOutcome, SagaSystem};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use config::{Config, LogFormat};
pub use error::{AppError, Result};

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()?;
    Ok(())
}

/// Installs the global Prometheus metrics recorder.
pub fn install_metrics() -> Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Places the configured order against the configured event store.
pub async fn run(config: &Config) -> Result<OrderOutcome> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("using PostgreSQL event store");
            let store = PostgresEventStore::connect(url).await?;
            store.run_migrations().await?;
            run_order(store, config).await
        }
        None => {
            tracing::info!("using in-memory event store");
            run_order(InMemoryEventStore::new(), config).await
        }
    }
}

/// Starts the saga components over `store` and places one order.
///
/// Components stop when this returns; a later call over the same store
/// recovers their state from the log.
#[tracing::instrument(skip_all, fields(user_id = %config.user_id, product_id = %config.product_id))]
pub async fn run_order<S>(store: S, config: &Config) -> Result<OrderOutcome>
where
    S: EventStore + Clone + 'static,
{
    let system = SagaSystem::builder(store)
        .config(config.saga.clone())
        .inventory(Inventory::new(stock_policy(config)))
        .payment(Payment::new(payment_policy(config)))
        .start();

    let outcome = system
        .client()
        .create_order(config.user_id, config.product_id)
        .await?;

    match &outcome {
        OrderOutcome::Completed(completed) => tracing::info!(
            correlation_id = %completed.correlation_id,
            tx_id = %completed.tx_id,
            "order completed"
        ),
        OrderOutcome::Failed(failed) => tracing::warn!(
            correlation_id = %failed.correlation_id,
            reason = %failed.reason,
            "order failed"
        ),
    }

    Ok(outcome)
}

fn stock_policy(config: &Config) -> StockPolicy {
    if config.out_of_stock.is_empty() {
        StockPolicy::Unlimited
    } else {
        StockPolicy::unavailable(config.out_of_stock.iter().copied())
    }
}

fn payment_policy(config: &Config) -> PaymentPolicy {
    if config.declined_users.is_empty() {
        PaymentPolicy::ApproveAll
    } else {
        PaymentPolicy::decline(config.declined_users.iter().copied())
    }
}
