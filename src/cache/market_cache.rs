//! Market Cache
//!
//! Key-value projections of per-contract order books and best-price
//! snapshots. The cache is authoritative only as a cache: a miss falls back
//! to the store and a write failure is logged and swallowed.

use rust_decimal::Decimal;
use std::sync::Arc;

use super::keys::CacheKey;
use super::redis_client::RedisClient;
use crate::models::{ContractId, Order};

/// Book entries live at most an hour; the activity flag at most five
/// minutes.
const BOOK_TTL_SECS: u64 = 3600;
const FLAG_TTL_SECS: u64 = 300;

pub struct MarketCache {
    redis: Arc<RedisClient>,
}

impl MarketCache {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    // ==================== Order Books ====================

    /// Replace the cached projection of a contract's live orders.
    pub async fn set_orderbook(&self, contract: &ContractId, orders: &[Order]) {
        let key = CacheKey::orderbook(contract);
        match serde_json::to_string(orders) {
            Ok(json) => {
                if let Err(e) = self.redis.set_ex(&key, json, BOOK_TTL_SECS).await {
                    tracing::warn!("Failed to cache orderbook for {}: {}", contract, e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize orderbook for {}: {}", contract, e),
        }
    }

    pub async fn get_orderbook(&self, contract: &ContractId) -> Option<Vec<Order>> {
        let key = CacheKey::orderbook(contract);
        match self.redis.get(&key).await {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read cached orderbook for {}: {}", contract, e);
                None
            }
        }
    }

    // ==================== Best Prices ====================

    pub async fn set_best_prices(
        &self,
        contract: &ContractId,
        best_bid: Option<Decimal>,
        best_offer: Option<Decimal>,
    ) {
        for (key, value) in [
            (CacheKey::best_bid(contract), best_bid),
            (CacheKey::best_offer(contract), best_offer),
        ] {
            let result = match value {
                Some(price) => self.redis.set_ex(&key, price.to_string(), BOOK_TTL_SECS).await,
                None => self.redis.del(&key).await.map(|_| ()),
            };
            if let Err(e) = result {
                tracing::warn!("Failed to cache best price {}: {}", key, e);
            }
        }
    }

    // ==================== Matching Flags ====================

    pub async fn set_has_active_orders(&self, value: bool) {
        if let Err(e) = self
            .redis
            .set_ex(CacheKey::has_active_orders(), value.to_string(), FLAG_TTL_SECS)
            .await
        {
            tracing::warn!("Failed to set active-orders flag: {}", e);
        }
    }

    /// `None` on a miss or error; the matcher then asks the store.
    pub async fn has_active_orders(&self) -> Option<bool> {
        match self.redis.get(CacheKey::has_active_orders()).await {
            Ok(Some(raw)) => raw.parse().ok(),
            Ok(None) => None,
            Err(_) => None,
        }
    }

    pub async fn record_match_pass(&self) {
        let now = chrono::Utc::now().to_rfc3339();
        if let Err(e) = self.redis.set_ex(CacheKey::last_run(), now, FLAG_TTL_SECS).await {
            tracing::warn!("Failed to record match pass timestamp: {}", e);
        }
    }
}
