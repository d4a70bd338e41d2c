use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::{Client, types::SendMessageBatchRequestEntry};
use tracing::{debug, info, warn};

use crate::{
    clients::queue::{NotificationQueue, QueueEntry, QueueMessage},
    config::Config,
};

pub struct SqsQueue {
    client: Client,
    queue_url: String,
    wait_time: Duration,
    visibility_timeout: Duration,
}

impl SqsQueue {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!(queue_url = %config.queue_url, "Connecting to SQS");

        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.sqs_endpoint {
            info!(endpoint = %endpoint, "Using custom SQS endpoint");
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            queue_url: config.queue_url.clone(),
            wait_time: config.queue_wait_time(),
            visibility_timeout: config.queue_visibility_timeout(),
        })
    }
}

#[async_trait]
impl NotificationQueue for SqsQueue {
    async fn send_batch(&self, entries: Vec<QueueEntry>) -> Result<(), Error> {
        let count = entries.len();
        let entries = entries
            .into_iter()
            .map(|entry| {
                SendMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .message_body(entry.body)
                    .build()
                    .map_err(|e| anyhow!("cannot build SQS batch entry: {}", e))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| anyhow!("cannot send batch to SQS: {}", e))?;

        let failed = output.failed();
        if !failed.is_empty() {
            for entry in failed {
                warn!(
                    entry_id = %entry.id(),
                    code = %entry.code(),
                    message = ?entry.message(),
                    "SQS rejected batch entry"
                );
            }
            return Err(anyhow!(
                "{} of {} batch entries rejected by SQS",
                failed.len(),
                count
            ));
        }

        debug!(count, "Batch sent to SQS");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueueMessage>, Error> {
        let wait_time = i32::try_from(self.wait_time.as_secs())
            .map_err(|_| anyhow!("wait time {:?} out of range", self.wait_time))?;
        let visibility_timeout = i32::try_from(self.visibility_timeout.as_secs())
            .map_err(|_| anyhow!("visibility timeout {:?} out of range", self.visibility_timeout))?;

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_time)
            .visibility_timeout(visibility_timeout)
            .send()
            .await
            .map_err(|e| anyhow!("cannot receive notification from SQS: {}", e))?;

        let Some(message) = output.messages().first() else {
            return Ok(None);
        };

        let receipt_handle = message
            .receipt_handle()
            .ok_or_else(|| anyhow!("SQS message without receipt handle"))?;

        Ok(Some(QueueMessage {
            message_id: message.message_id().unwrap_or_default().to_string(),
            receipt_handle: receipt_handle.to_string(),
            body: message.body().unwrap_or_default().to_string(),
        }))
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), Error> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| anyhow!("failed to delete message from SQS: {}", e))?;

        Ok(())
    }
}
