//! Publish/subscribe transport abstraction.
//!
//! A [`PushTransport`] opens a connection on a topic and yields the
//! [`PushMessage`]s published there. Dropping the returned stream releases
//! the connection.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::models::PushMessage;

/// Messages of one transport connection.
///
/// An `Err` item reports a connection-level failure; the stream ending means
/// the server closed the topic.
pub type PushStream = BoxStream<'static, Result<PushMessage, SyncError>>;

/// Push transport (websocket, postgres changes feed, in-memory bus, ...).
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a connection on `topic`.
    ///
    /// Fails with [`SyncError::TransportFailure`] when the connection cannot
    /// be established.
    async fn connect(&self, topic: &str) -> Result<PushStream, SyncError>;
}

/// Default per-topic buffer of the in-memory transport.
pub const DEFAULT_TOPIC_CAPACITY: usize = 64;

/// In-memory transport fanning each topic out to every connection.
///
/// Lagging connections skip what they missed instead of blocking
/// publishers.
#[derive(Clone)]
pub struct BroadcastTransport {
    topics: Arc<DashMap<String, broadcast::Sender<PushMessage>>>,
    capacity: usize,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    /// Publish `message` on `topic`; returns the number of connections
    /// that received it.
    pub fn publish(&self, topic: &str, message: PushMessage) -> usize {
        match self.topics.get(topic) {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => {
                debug!("No connection on topic '{}', dropping message", topic);
                0
            }
        }
    }

    /// Number of open connections on `topic`.
    pub fn connection_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Close `topic`: every open stream on it ends.
    pub fn close_topic(&self, topic: &str) {
        self.topics.remove(topic);
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<PushMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

#[async_trait]
impl PushTransport for BroadcastTransport {
    async fn connect(&self, topic: &str) -> Result<PushStream, SyncError> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();
        debug!("Connected to topic '{}'", topic);

        let messages = stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((Ok(message), receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Topic '{}' lagged, skipped {} message(s)", topic, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(messages))
    }
}
