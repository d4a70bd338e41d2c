use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    clients::store::ReceiverStore,
    models::event::{Event, Notification, Receiver},
};

/// Reads the receivers an event should reach. Stateless; any caching belongs
/// to the store.
#[derive(Clone)]
pub struct ReceiverResolver {
    store: Arc<dyn ReceiverStore>,
}

impl ReceiverResolver {
    pub fn new(store: Arc<dyn ReceiverStore>) -> Self {
        Self { store }
    }

    pub async fn receivers_for_event(
        &self,
        instance_id: &str,
        event_type: &str,
    ) -> Result<Vec<Receiver>, Error> {
        self.store
            .receivers_for_event(instance_id, event_type)
            .await
            .map_err(|e| {
                anyhow!(
                    "cannot get receivers for instance {} and event type {}: {}",
                    instance_id,
                    event_type,
                    e
                )
            })
    }
}

/// Expands an event into one notification per subscribed receiver.
#[derive(Clone)]
pub struct NotificationBuilder {
    resolver: ReceiverResolver,
}

impl NotificationBuilder {
    pub fn new(resolver: ReceiverResolver) -> Self {
        Self { resolver }
    }

    pub async fn build_notifications(&self, event: &Event) -> Result<Vec<Notification>, Error> {
        let receivers = self
            .resolver
            .receivers_for_event(&event.instance_id, &event.event_type)
            .await?;

        let notifications = notifications_for(event, &receivers);

        info!(
            event_type = %event.event_type,
            instance_id = %event.instance_id,
            receivers = receivers.len(),
            notifications = notifications.len(),
            "Built notifications"
        );

        Ok(notifications)
    }
}

/// Pairs each receiver with the event's rendered payload for its channel.
/// Receivers whose channel has no payload are skipped.
pub fn notifications_for(event: &Event, receivers: &[Receiver]) -> Vec<Notification> {
    receivers
        .iter()
        .filter_map(|receiver| {
            let Some(data) = event
                .message_for(receiver.receiver_type)
                .filter(|data| !is_blank(data))
            else {
                debug!(
                    receiver_id = %receiver.id,
                    receiver_type = %receiver.receiver_type,
                    event_type = %event.event_type,
                    "No message rendered for receiver type, skipping"
                );
                return None;
            };

            Some(Notification {
                receiver_type: receiver.receiver_type,
                instance_id: event.instance_id.clone(),
                address: receiver.address.clone(),
                data: data.clone(),
                event: event.clone(),
            })
        })
        .collect()
}

fn is_blank(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}
