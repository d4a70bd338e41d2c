use std::collections::HashMap;

use anyhow::{Error, Result};
use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Live messages for one topic. Dropping it unsubscribes.
pub type Subscription = BoxStream<'static, Vec<u8>>;

/// Fire-and-forget topic messaging. Nothing is persisted: a message published
/// while nobody is subscribed is lost.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, Error>;
}

const TOPIC_CAPACITY: usize = 64;

/// Process-local pub-sub over tokio broadcast channels.
#[derive(Default)]
pub struct MemoryPubSub {
    topics: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let mut topics = self.topics.lock();

        let Some(sender) = topics.get(topic) else {
            debug!(topic, "No subscribers, message dropped");
            return Ok(());
        };

        if sender.send(payload.to_vec()).is_err() {
            debug!(topic, "All subscribers gone, message dropped");
            topics.remove(topic);
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, Error> {
        let receiver = self
            .topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        let topic = topic.to_string();
        let stream = futures_util::stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "Slow subscriber skipped messages");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
