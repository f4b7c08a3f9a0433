//! Redis Connection Management
//!
//! Connection pooling, bounded retries, and graceful degradation when Redis
//! is unavailable. The cache is best-effort everywhere: callers fall back to
//! the store on a miss and log on write failure.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Maximum retry attempts for operations
    pub max_retries: u32,
    /// Base retry delay in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

/// Redis client wrapper with lazy reconnection.
pub struct RedisClient {
    config: RedisConfig,
    connection: Arc<RwLock<Option<ConnectionManager>>>,
    client: Client,
}

impl RedisClient {
    pub async fn new(config: RedisConfig) -> Result<Self, RedisError> {
        let client = Client::open(config.url.as_str())?;

        let redis_client = Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            client,
        };

        redis_client.ensure_connected().await?;

        Ok(redis_client)
    }

    async fn ensure_connected(&self) -> Result<(), RedisError> {
        let mut conn = self.connection.write().await;
        if conn.is_none() {
            tracing::info!("Establishing Redis connection to {}", self.config.url);
            let manager = ConnectionManager::new(self.client.clone()).await?;
            *conn = Some(manager);
            tracing::info!("Redis connection established");
        }
        Ok(())
    }

    async fn get_connection(&self) -> Result<ConnectionManager, RedisError> {
        self.ensure_connected().await?;
        let conn = self.connection.read().await;
        conn.clone()
            .ok_or_else(|| RedisError::from((redis::ErrorKind::IoError, "Connection not available")))
    }

    /// Execute an operation with retry, forcing a reconnect between
    /// attempts.
    async fn with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, RedisError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            match self.get_connection().await {
                Ok(conn) => match operation(conn).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        tracing::warn!(
                            "Redis operation failed (attempt {}/{}): {}",
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        last_error = Some(e);

                        if attempt < self.config.max_retries - 1 {
                            let mut conn = self.connection.write().await;
                            *conn = None;
                            tokio::time::sleep(Duration::from_millis(
                                self.config.retry_delay_ms * (attempt as u64 + 1),
                            ))
                            .await;
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "Redis connection failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.config.max_retries,
                        e
                    );
                    last_error = Some(e);

                    if attempt < self.config.max_retries - 1 {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.retry_delay_ms * (attempt as u64 + 1),
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| RedisError::from((redis::ErrorKind::IoError, "Max retries exceeded"))))
    }

    // ==================== Operations ====================

    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move { conn.get(&key).await }
        })
        .await
    }

    /// SET with a mandatory expiry; every cache entry carries a TTL.
    pub async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> Result<(), RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            let value = value.clone();
            async move { conn.set_ex(&key, value, ttl_secs).await }
        })
        .await
    }

    pub async fn del(&self, key: &str) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| {
            let key = key.to_string();
            async move {
                let count: i32 = conn.del(&key).await?;
                Ok(count > 0)
            }
        })
        .await
    }

    pub async fn publish(&self, channel: &str, message: String) -> Result<i32, RedisError> {
        self.with_retry(|mut conn| {
            let channel = channel.to_string();
            let message = message.clone();
            async move { conn.publish(&channel, message).await }
        })
        .await
    }

    pub async fn ping(&self) -> Result<bool, RedisError> {
        self.with_retry(|mut conn| async move {
            let result: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(result == "PONG")
        })
        .await
    }
}
