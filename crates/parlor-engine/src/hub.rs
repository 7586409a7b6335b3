//! In-process pub/sub hub carrying the outbound chat channels.
//!
//! Topics are the strings built by [`parlor_shared::protocol::topic`].
//! Payloads travel as `serde_json::Value` so the transport layer can forward
//! them without knowing their concrete type.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use parlor_shared::constants::DEFAULT_HUB_CAPACITY;

#[derive(Clone)]
pub struct EventHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Serialize `payload` and publish it to `topic`.
    ///
    /// Returns the number of subscribers that received it. Nobody listening
    /// is not an error.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> usize {
        let value = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(topic, error = %e, "dropping unserializable payload");
                return 0;
            }
        };
        self.publish_value(topic, value).await
    }

    pub async fn publish_value(&self, topic: &str, value: serde_json::Value) -> usize {
        let channels = self.channels.read().await;
        match channels.get(topic) {
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to a topic, creating its channel on first use.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Drop channels nobody listens to anymore.
    pub async fn cleanup(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    pub async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
