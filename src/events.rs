use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tracing::{error, info};

use crate::{
    clients::store::EventStore,
    fanout::NotificationBuilder,
    metrics,
    models::event::Event,
    producer::BatchProducer,
};

/// Stores events and fans them out to the queue.
#[derive(Clone)]
pub struct EventManager {
    store: Arc<dyn EventStore>,
    builder: NotificationBuilder,
    producer: BatchProducer,
}

impl EventManager {
    pub fn new(store: Arc<dyn EventStore>, builder: NotificationBuilder, producer: BatchProducer) -> Self {
        Self {
            store,
            builder,
            producer,
        }
    }

    /// Persists `event` and returns its id. Fan-out happens afterwards and its
    /// failures are logged, never returned: a stored event is a success.
    pub async fn store_and_send(&self, mut event: Event) -> Result<String, Error> {
        let event_id = match self.store.create_event(&event).await {
            Ok(id) => id,
            Err(e) => {
                metrics::record_event_stored(&event.event_type, false);
                return Err(anyhow!("cannot store event: {}", e));
            }
        };
        metrics::record_event_stored(&event.event_type, true);

        event.id = event_id.clone();
        info!(
            event_id = %event_id,
            event_type = %event.event_type,
            instance_id = %event.instance_id,
            "Event stored"
        );

        match self.builder.build_notifications(&event).await {
            Ok(notifications) => {
                if let Err(e) = self.producer.enqueue(&event.event_type, notifications) {
                    error!(event_id = %event_id, error = %e, "Cannot enqueue notifications");
                    metrics::record_enqueue(&event.event_type, false);
                }
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Cannot build notifications");
                metrics::record_enqueue(&event.event_type, false);
            }
        }

        Ok(event_id)
    }

    pub async fn wait(&self) {
        self.producer.wait().await;
    }
}
