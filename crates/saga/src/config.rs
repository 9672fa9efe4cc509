//! Runtime configuration for the saga components.

use std::time::Duration;

/// Saga tuning with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_CLIENT_TIMEOUT_MS`: how long a client waits for an outcome (default: `5000`)
/// - `SAGA_OUTBOX_SWEEP_MS`: interval between outbox re-publication sweeps (default: `1000`)
/// - `SAGA_TERMINAL_RETENTION`: finished correlation IDs remembered for duplicate absorption (default: `1024`)
/// - `SAGA_MAX_COMMAND_ATTEMPTS`: attempts per saga step when persistence fails (default: `3`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub client_timeout: Duration,
    pub outbox_sweep_interval: Duration,
    pub terminal_retention: usize,
    pub max_command_attempts: u32,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            client_timeout: parse("SAGA_CLIENT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.client_timeout),
            outbox_sweep_interval: parse("SAGA_OUTBOX_SWEEP_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_sweep_interval),
            terminal_retention: parse("SAGA_TERMINAL_RETENTION")
                .map(|n| n as usize)
                .unwrap_or(defaults.terminal_retention),
            max_command_attempts: parse("SAGA_MAX_COMMAND_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_command_attempts),
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_secs(5),
            outbox_sweep_interval: Duration::from_secs(1),
            terminal_retention: 1024,
            max_command_attempts: 3,
        }
    }
}
