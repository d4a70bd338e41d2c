use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    sync::Notify,
    time::{Instant, timeout},
};
use tracing::debug;
use uuid::Uuid;

use crate::clients::queue::{NotificationQueue, QueueEntry, QueueMessage};

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

/// In-process queue with the same visibility semantics as SQS. Used for local
/// runs (`QUEUE_URL=memory://`) and tests.
pub struct MemoryQueue {
    messages: Mutex<VecDeque<StoredMessage>>,
    available: Notify,
    wait_time: Duration,
    visibility_timeout: Duration,
    sequence: AtomicU64,
}

impl MemoryQueue {
    pub fn new(wait_time: Duration, visibility_timeout: Duration) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            wait_time,
            visibility_timeout,
            sequence: AtomicU64::new(0),
        }
    }

    /// Messages not yet deleted, visible or not.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently received and awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.visible_at > now)
            .count()
    }

    /// How many times the message with this body has been handed out.
    pub fn receive_count(&self, body: &str) -> Option<u32> {
        self.messages
            .lock()
            .iter()
            .find(|m| m.body == body)
            .map(|m| m.receive_count)
    }

    fn try_take(&self) -> Result<QueueMessage, Option<Instant>> {
        let now = Instant::now();
        let mut messages = self.messages.lock();

        if let Some(message) = messages.iter_mut().find(|m| m.visible_at <= now) {
            let receipt_handle = Uuid::new_v4().to_string();
            message.visible_at = now + self.visibility_timeout;
            message.receipt_handle = Some(receipt_handle.clone());
            message.receive_count += 1;

            return Ok(QueueMessage {
                message_id: message.message_id.clone(),
                receipt_handle,
                body: message.body.clone(),
            });
        }

        Err(messages.iter().map(|m| m.visible_at).min())
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(20), Duration::from_secs(60))
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn send_batch(&self, entries: Vec<QueueEntry>) -> Result<(), Error> {
        if entries.len() > 10 {
            return Err(anyhow!(
                "batch of {} entries exceeds the limit of 10",
                entries.len()
            ));
        }

        let now = Instant::now();
        {
            let mut messages = self.messages.lock();
            for entry in entries {
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                messages.push_back(StoredMessage {
                    message_id: format!("{}-{}", sequence, entry.id),
                    body: entry.body,
                    visible_at: now,
                    receipt_handle: None,
                    receive_count: 0,
                });
            }
        }

        self.available.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueueMessage>, Error> {
        let deadline = Instant::now() + self.wait_time;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = match self.try_take() {
                Ok(message) => {
                    debug!(message_id = %message.message_id, "Message received from memory queue");
                    return Ok(Some(message));
                }
                Err(next_visible) => next_visible
                    .map(|at| at.min(deadline))
                    .unwrap_or(deadline),
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wait = wake_at.saturating_duration_since(Instant::now());
            let _ = timeout(wait, notified).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), Error> {
        let mut messages = self.messages.lock();
        let position = messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| anyhow!("receipt handle {} is not valid", receipt_handle))?;

        messages.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, body: &str) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_received_message_is_hidden_until_timeout() -> Result<()> {
        let queue = MemoryQueue::new(Duration::from_millis(20), Duration::from_millis(100));
        queue.send_batch(vec![entry("0", "a")]).await?;

        let first = queue.receive().await?.ok_or_else(|| anyhow!("expected message"))?;
        assert_eq!(first.body, "a");
        assert!(queue.receive().await?.is_none());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let again = queue.receive().await?.ok_or_else(|| anyhow!("expected redelivery"))?;
        assert_eq!(again.message_id, first.message_id);
        assert_ne!(again.receipt_handle, first.receipt_handle);

        assert!(queue.delete(&first.receipt_handle).await.is_err());
        queue.delete(&again.receipt_handle).await?;
        assert!(queue.is_empty());
        Ok(())
    }
}
