//! Market cache: Redis-backed key-value projections plus the pub/sub bus.
//!
//! The process keeps working when Redis is down; every accessor degrades to
//! a no-op or a store fallback.

mod keys;
mod market_cache;
mod pubsub;
mod redis_client;

pub use keys::CacheKey;
pub use market_cache::MarketCache;
pub use pubsub::Publisher;
pub use redis_client::{RedisClient, RedisConfig};

use std::sync::Arc;

use crate::events::MarketEvent;

pub struct CacheManager {
    client: Option<Arc<RedisClient>>,
    market: Option<Arc<MarketCache>>,
    publisher: Option<Arc<Publisher>>,
}

impl CacheManager {
    /// Connect to Redis; on failure, come up degraded rather than refusing
    /// to start.
    pub async fn new(config: RedisConfig) -> Self {
        match RedisClient::new(config).await {
            Ok(client) => {
                let client = Arc::new(client);
                Self {
                    client: Some(client.clone()),
                    market: Some(Arc::new(MarketCache::new(client.clone()))),
                    publisher: Some(Arc::new(Publisher::new(client))),
                }
            }
            Err(e) => {
                tracing::warn!("Redis unavailable, cache disabled: {}", e);
                Self {
                    client: None,
                    market: None,
                    publisher: None,
                }
            }
        }
    }

    /// A manager with no backing Redis; every operation degrades to a
    /// no-op. Used when no cache is configured and in tests.
    pub fn disabled() -> Self {
        Self {
            client: None,
            market: None,
            publisher: None,
        }
    }

    /// Live round-trip check against Redis.
    pub async fn is_available(&self) -> bool {
        match &self.client {
            Some(client) => client.ping().await.unwrap_or(false),
            None => false,
        }
    }

    pub fn market_opt(&self) -> Option<&Arc<MarketCache>> {
        self.market.as_ref()
    }

    /// Publish an event on the cache bus; silently skipped when degraded.
    pub async fn publish(&self, event: &MarketEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event).await;
        }
    }
}
