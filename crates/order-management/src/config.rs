//! Application configuration loaded from environment variables.

use common::{ProductId, UserId};
use saga::SagaConfig;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" | "pretty" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Application configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `plain` or `json` (default: `plain`)
/// - `DATABASE_URL`: PostgreSQL connection string; the in-memory store is used when unset
/// - `ORDER_USER_ID` / `ORDER_PRODUCT_ID`: the order to place (default: `9` / `1337`)
/// - `INVENTORY_OUT_OF_STOCK`: comma-separated product IDs that cannot be reserved
/// - `PAYMENT_DECLINED_USERS`: comma-separated user IDs whose payments are declined
///
/// Saga tuning is read by [`SagaConfig::from_lookup`].
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub out_of_stock: Vec<ProductId>,
    pub declined_users: Vec<UserId>,
    pub saga: SagaConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let id = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let ids = |key: &str| -> Vec<u64> {
            lookup(key)
                .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                .unwrap_or_default()
        };

        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            user_id: id("ORDER_USER_ID")
                .map(UserId::new)
                .unwrap_or(defaults.user_id),
            product_id: id("ORDER_PRODUCT_ID")
                .map(ProductId::new)
                .unwrap_or(defaults.product_id),
            out_of_stock: ids("INVENTORY_OUT_OF_STOCK")
                .into_iter()
                .map(ProductId::new)
                .collect(),
            declined_users: ids("PAYMENT_DECLINED_USERS")
                .into_iter()
                .map(UserId::new)
                .collect(),
            saga: SagaConfig::from_lookup(&lookup),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Plain,
            database_url: None,
            user_id: UserId::new(9),
            product_id: ProductId::new(1337),
            out_of_stock: Vec::new(),
            declined_users: Vec::new(),
            saga: SagaConfig::default(),
        }
    }
}
