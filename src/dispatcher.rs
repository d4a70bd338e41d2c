use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use tokio::time::{Instant, sleep};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    clients::queue::{NotificationQueue, QueueMessage},
    error::{is_retriable, retriable},
    metrics,
    models::{event::Notification, status::DeliveryOutcome},
    senders::SenderRegistry,
};

const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Consumes the notification queue one message per poll and hands each
/// message to the sender registered for its channel on its own task.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn NotificationQueue>,
    senders: Arc<SenderRegistry>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn NotificationQueue>, senders: SenderRegistry) -> Self {
        Self {
            queue,
            senders: Arc::new(senders),
            tracker: TaskTracker::new(),
        }
    }

    /// Polls until `cancel` fires, then waits for in-flight deliveries.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            receiver_types = ?self.senders.receiver_types(),
            "Dispatcher started"
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.queue.receive() => received,
            };

            match received {
                Ok(None) => continue,
                Ok(Some(message)) => {
                    metrics::record_receive(true);
                    debug!(message_id = %message.message_id, "Message received");

                    let dispatcher = self.clone();
                    let cancel = cancel.clone();
                    self.tracker.spawn(async move {
                        dispatcher.handle_message(message, &cancel).await;
                    });
                }
                Err(e) => {
                    metrics::record_receive(false);
                    error!(error = %e, "Cannot receive message from queue");

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(RECEIVE_ERROR_PAUSE) => {}
                    }
                }
            }
        }

        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Dispatcher stopping, draining deliveries");
        self.tracker.wait().await;
        info!("Dispatcher stopped");
    }

    /// Delivers one message and acknowledges it unless the failure was retriable.
    pub async fn handle_message(
        &self,
        message: QueueMessage,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let started = Instant::now();

        let notification: Notification = match serde_json::from_str(&message.body) {
            Ok(notification) => notification,
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    error = %e,
                    "Cannot decode notification, dropping message"
                );
                metrics::record_notification_error("unknown");
                self.acknowledge(&message, "unknown").await;
                return DeliveryOutcome::Dropped;
            }
        };

        let receiver_type = notification.receiver_type;
        metrics::record_notification(receiver_type);

        let Some(sender) = self.senders.get(receiver_type) else {
            error!(
                message_id = %message.message_id,
                receiver_type = %receiver_type,
                "No sender registered for receiver type, dropping message"
            );
            metrics::record_notification_error(receiver_type.as_str());
            self.acknowledge(&message, receiver_type.as_str()).await;
            return DeliveryOutcome::Dropped;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(retriable(anyhow!("delivery cancelled by shutdown"))),
            result = sender.send(&notification.address, &notification.data, &notification.instance_id) => result,
        };

        let outcome = match result {
            Ok(()) => {
                info!(
                    message_id = %message.message_id,
                    receiver_type = %receiver_type,
                    instance_id = %notification.instance_id,
                    "Notification delivered"
                );
                self.acknowledge(&message, receiver_type.as_str()).await;
                DeliveryOutcome::Delivered
            }
            Err(e) if is_retriable(&e) => {
                error!(
                    message_id = %message.message_id,
                    receiver_type = %receiver_type,
                    instance_id = %notification.instance_id,
                    error = %e,
                    "Retriable delivery failure, message left for redelivery"
                );
                metrics::record_retry_error(receiver_type);
                DeliveryOutcome::Retry
            }
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    receiver_type = %receiver_type,
                    instance_id = %notification.instance_id,
                    error = %e,
                    "Permanent delivery failure, dropping message"
                );
                metrics::record_no_retry_error(receiver_type);
                self.acknowledge(&message, receiver_type.as_str()).await;
                DeliveryOutcome::Dropped
            }
        };

        metrics::record_completed(started.elapsed());
        outcome
    }

    async fn acknowledge(&self, message: &QueueMessage, receiver_type: &str) {
        match self.queue.delete(&message.receipt_handle).await {
            Ok(()) => metrics::record_deleted(receiver_type),
            Err(e) => error!(
                message_id = %message.message_id,
                error = %e,
                "Cannot delete message from queue, it will be redelivered"
            ),
        }
    }
}
