use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::{
    clients::queue::{NotificationQueue, QueueEntry},
    metrics,
    models::event::Notification,
    utils::partition,
};

/// Partitions notifications into batches and enqueues each batch on its own
/// task. Callers return as soon as the batches are handed off; [`wait`]
/// drains what is still in flight.
///
/// [`wait`]: BatchProducer::wait
#[derive(Clone)]
pub struct BatchProducer {
    queue: Arc<dyn NotificationQueue>,
    batch_size: usize,
    tracker: TaskTracker,
}

impl BatchProducer {
    pub fn new(queue: Arc<dyn NotificationQueue>, batch_size: usize) -> Self {
        Self {
            queue,
            batch_size: batch_size.max(1),
            tracker: TaskTracker::new(),
        }
    }

    /// Hands every batch to a background task and returns how many were
    /// dispatched. A batch that cannot be serialized is skipped.
    pub fn enqueue(&self, event_type: &str, notifications: Vec<Notification>) -> Result<usize, Error> {
        if self.tracker.is_closed() {
            return Err(anyhow!("producer is shutting down, notifications not enqueued"));
        }

        if notifications.is_empty() {
            debug!(event_type, "No notifications to enqueue");
            return Ok(0);
        }

        let mut dispatched = 0;

        for (index, batch) in partition(notifications, self.batch_size).into_iter().enumerate() {
            let entries = match to_entries(&batch) {
                Ok(entries) => entries,
                Err(e) => {
                    error!(event_type, batch = index, error = %e, "Cannot serialize batch, skipping");
                    metrics::record_enqueue(event_type, false);
                    continue;
                }
            };

            let queue = self.queue.clone();
            let event_type = event_type.to_string();

            self.tracker.spawn(async move {
                let count = entries.len();
                match queue.send_batch(entries).await {
                    Ok(()) => {
                        debug!(event_type = %event_type, count, "Batch enqueued");
                        metrics::record_enqueue(&event_type, true);
                        metrics::record_enqueued(count);
                    }
                    Err(e) => {
                        error!(event_type = %event_type, count, error = %e, "Failed to enqueue batch");
                        metrics::record_enqueue(&event_type, false);
                    }
                }
            });

            dispatched += 1;
        }

        Ok(dispatched)
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting work and waits for every outstanding batch.
    pub async fn wait(&self) {
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Waiting for outstanding batches");
        self.tracker.wait().await;
    }
}

fn to_entries(batch: &[Notification]) -> Result<Vec<QueueEntry>, Error> {
    batch
        .iter()
        .enumerate()
        .map(|(id, notification)| {
            Ok(QueueEntry {
                id: id.to_string(),
                body: serde_json::to_string(notification)?,
            })
        })
        .collect()
}
