use std::collections::HashMap;

use anyhow::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::event::{Event, Receiver};

/// Read side of receiver configuration.
#[async_trait]
pub trait ReceiverStore: Send + Sync {
    /// Receivers of `instance_id` subscribed to `event_type`. Empty is valid.
    async fn receivers_for_event(
        &self,
        instance_id: &str,
        event_type: &str,
    ) -> Result<Vec<Receiver>, Error>;
}

/// Durable event storage. The returned id is assigned by the store.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: &Event) -> Result<String, Error>;
}

/// Resolves tenant instance ids to display names.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    async fn instance_name(&self, instance_id: &str) -> Result<Option<String>, Error>;
}

#[derive(Default)]
pub struct MemoryStore {
    receivers: RwLock<Vec<Receiver>>,
    events: RwLock<Vec<Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_receiver(&self, receiver: Receiver) {
        self.receivers.write().push(receiver);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }
}

#[async_trait]
impl ReceiverStore for MemoryStore {
    async fn receivers_for_event(
        &self,
        instance_id: &str,
        event_type: &str,
    ) -> Result<Vec<Receiver>, Error> {
        Ok(self
            .receivers
            .read()
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .filter(|r| r.event_types.iter().any(|t| t == event_type))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create_event(&self, event: &Event) -> Result<String, Error> {
        let id = Uuid::new_v4().to_string();
        let mut stored = event.clone();
        stored.id = id.clone();
        self.events.write().push(stored);
        Ok(id)
    }
}

/// Directory backed by a fixed map. Unknown instances resolve to their own id
/// unless `strict` is set, in which case they are reported missing.
#[derive(Default)]
pub struct StaticDirectory {
    names: HashMap<String, String>,
    strict: bool,
}

impl StaticDirectory {
    pub fn new(names: HashMap<String, String>, strict: bool) -> Self {
        Self { names, strict }
    }
}

#[async_trait]
impl InstanceDirectory for StaticDirectory {
    async fn instance_name(&self, instance_id: &str) -> Result<Option<String>, Error> {
        match self.names.get(instance_id) {
            Some(name) => Ok(Some(name.clone())),
            None if self.strict => Ok(None),
            None => Ok(Some(instance_id.to_string())),
        }
    }
}
