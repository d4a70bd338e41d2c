use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{clients::pubsub::PubSub, metrics, senders::Sender};

/// Publishes to the tenant's topic. Failures are never retried.
pub struct BrowserSender {
    pubsub: Arc<dyn PubSub>,
}

impl BrowserSender {
    pub fn new(pubsub: Arc<dyn PubSub>) -> Self {
        Self { pubsub }
    }
}

#[async_trait]
impl Sender for BrowserSender {
    async fn send(&self, _address: &Value, data: &Value, instance: &str) -> Result<(), Error> {
        let payload = serde_json::to_vec(data)?;

        if let Err(e) = self.pubsub.publish(instance, &payload).await {
            metrics::record_publication(false);
            return Err(anyhow!("cannot publish browser notification: {}", e));
        }

        metrics::record_publication(true);
        debug!(instance, "Browser notification published");
        Ok(())
    }
}
