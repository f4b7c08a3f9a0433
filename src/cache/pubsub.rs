//! Cache Bus Publisher
//!
//! Publishes the `{type, data, timestamp}` envelope to the Redis channel
//! named after the event's tag, for intra-process and external consumers.
//! Publish failures are logged and never propagate to the caller path.

use std::sync::Arc;

use super::redis_client::RedisClient;
use crate::events::MarketEvent;

pub struct Publisher {
    redis: Arc<RedisClient>,
}

impl Publisher {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    pub async fn publish(&self, event: &MarketEvent) {
        let envelope = event.envelope();
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Failed to serialize {} event: {}", event.kind(), e);
                return;
            }
        };

        match self.redis.publish(event.kind(), json).await {
            Ok(n) => {
                tracing::debug!("Published {} to {} subscribers", event.kind(), n);
            }
            Err(e) => {
                tracing::warn!("Failed to publish {} event: {}", event.kind(), e);
            }
        }
    }
}
