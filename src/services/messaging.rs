//! External Messaging Sink
//!
//! Thin adapter over the asynchronous messaging gateway: `send(recipient,
//! text)` and nothing else. Delivery is best-effort with a hard per-call
//! timeout; a failed or slow send never blocks or aborts a core state
//! transition. Inbound traffic from this channel enters the system through
//! the internal HTTP endpoint, not through this adapter.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver `text` to the recipient identifier. Returns whether the
    /// gateway accepted the message.
    async fn send(&self, recipient: &str, text: &str) -> bool;
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    recipient: &'a str,
    text: &'a str,
}

/// POSTs messages to the configured gateway webhook.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl MessageSink for WebhookSink {
    async fn send(&self, recipient: &str, text: &str) -> bool {
        let request = self
            .client
            .post(&self.url)
            .json(&OutboundMessage { recipient, text })
            .send();

        match tokio::time::timeout(SEND_TIMEOUT, request).await {
            Ok(Ok(response)) if response.status().is_success() => true,
            Ok(Ok(response)) => {
                tracing::warn!(
                    "Messaging gateway rejected message to {}: {}",
                    recipient,
                    response.status()
                );
                false
            }
            Ok(Err(e)) => {
                tracing::warn!("Messaging gateway send to {} failed: {}", recipient, e);
                false
            }
            Err(_) => {
                tracing::warn!("Messaging gateway send to {} timed out", recipient);
                false
            }
        }
    }
}

/// Swallows all messages; used when no gateway is configured and in tests.
#[derive(Default)]
pub struct NoopSink;

#[async_trait]
impl MessageSink for NoopSink {
    async fn send(&self, recipient: &str, _text: &str) -> bool {
        tracing::debug!("Messaging disabled, dropping message to {}", recipient);
        true
    }
}
