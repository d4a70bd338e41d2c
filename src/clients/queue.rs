use anyhow::{Error, Result};
use async_trait::async_trait;

/// One entry of a batch-send call.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Unique within its batch.
    pub id: String,
    pub body: String,
}

/// A received message plus the handle needed to acknowledge it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

/// A durable, at-least-once queue with visibility-timeout redelivery.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Enqueues up to ten entries in one call.
    async fn send_batch(&self, entries: Vec<QueueEntry>) -> Result<(), Error>;

    /// Long-polls for at most one message. `None` means the wait elapsed empty.
    /// A returned message stays hidden from other consumers for the visibility
    /// timeout and reappears unless deleted before then.
    async fn receive(&self) -> Result<Option<QueueMessage>, Error>;

    /// Acknowledges a message so it is never redelivered.
    async fn delete(&self, receipt_handle: &str) -> Result<(), Error>;
}
