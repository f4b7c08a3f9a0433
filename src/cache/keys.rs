//! Cache key and channel naming

use crate::models::ContractId;

pub struct CacheKey;

impl CacheKey {
    /// Serialized list of a contract's live orders.
    pub fn orderbook(contract: &ContractId) -> String {
        format!("orderbook:{}", contract)
    }

    pub fn best_bid(contract: &ContractId) -> String {
        format!("market:{}:best_bid", contract)
    }

    pub fn best_offer(contract: &ContractId) -> String {
        format!("market:{}:best_offer", contract)
    }

    /// Process-wide flag the periodic matcher consults before doing work.
    pub fn has_active_orders() -> &'static str {
        "matching:has_active_orders"
    }

    /// Timestamp of the last completed match pass, read by health checks.
    pub fn last_run() -> &'static str {
        "matching:last_run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        let contract = ContractId::parse("jan26-silver").unwrap();
        assert_eq!(CacheKey::orderbook(&contract), "orderbook:jan26-silver");
        assert_eq!(CacheKey::best_bid(&contract), "market:jan26-silver:best_bid");
        assert_eq!(CacheKey::best_offer(&contract), "market:jan26-silver:best_offer");
    }
}
