//! Application configuration
//!
//! Loaded from the environment (with `.env` support) over built-in
//! defaults. Every externally adjustable knob of the matching core lives
//! here.

use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub port: u16,
    pub database_url: String,
    /// Empty string disables the cache entirely.
    pub redis_url: String,
    pub jwt_secret: String,
    /// Webhook of the external messaging gateway; unset disables outbound
    /// messages.
    pub messaging_webhook_url: Option<String>,

    pub commission_rate: Decimal,
    pub max_orders_per_user: i64,
    pub order_expiry_hours: i64,
    pub matching_interval_secs: u64,
    pub match_pass_budget_secs: u64,
    pub qcsm_deadline_secs: u64,
    pub negotiation_deadline_secs: u64,
    pub spread_alert_cap: Decimal,
    pub book_mirror_ttl_secs: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("environment", "development")?
            .set_default("port", 8080i64)?
            .set_default("database_url", "postgres://localhost/commex")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("jwt_secret", "dev_secret_change_me")?
            .set_default("commission_rate", "0.001")?
            .set_default("max_orders_per_user", 50i64)?
            .set_default("order_expiry_hours", 24i64)?
            .set_default("matching_interval_secs", 5i64)?
            .set_default("match_pass_budget_secs", 30i64)?
            .set_default("qcsm_deadline_secs", 60i64)?
            .set_default("negotiation_deadline_secs", 30i64)?
            .set_default("spread_alert_cap", "0.20")?
            .set_default("book_mirror_ttl_secs", 30i64)?
            .add_source(config::Environment::default())
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.commission_rate, dec!(0.001));
        assert_eq!(config.max_orders_per_user, 50);
        assert_eq!(config.order_expiry_hours, 24);
        assert!(config.matching_interval_secs <= 5);
        assert_eq!(config.qcsm_deadline_secs, 60);
        assert_eq!(config.spread_alert_cap, dec!(0.20));
    }
}
