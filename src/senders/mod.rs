//! Channel senders: one implementation per [`ReceiverType`], registered once
//! at startup in an immutable [`SenderRegistry`].
//!
//! A sender returns `Ok(())` on delivery. Failures wrapped with
//! [`crate::error::retriable`] leave the queue message for redelivery; any
//! other failure is permanent and the message is acknowledged.

pub mod browser;
pub mod email;
pub mod opsgenie;
pub mod pagerduty;
pub mod slack;
pub mod stackdriver;

use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::event::ReceiverType;

pub use browser::BrowserSender;
pub use email::EmailSender;
pub use opsgenie::OpsGenieSender;
pub use pagerduty::PagerDutySender;
pub use slack::SlackSender;
pub use stackdriver::StackdriverSender;

#[async_trait]
pub trait Sender: Send + Sync {
    /// Delivers `data` to `address` on behalf of tenant `instance`.
    async fn send(&self, address: &Value, data: &Value, instance: &str) -> Result<(), Error>;
}

/// Maps each channel to its sender. Built once, shared read-only.
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<ReceiverType, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn builder() -> SenderRegistryBuilder {
        SenderRegistryBuilder::default()
    }

    pub fn get(&self, receiver_type: ReceiverType) -> Option<&Arc<dyn Sender>> {
        self.senders.get(&receiver_type)
    }

    pub fn receiver_types(&self) -> Vec<ReceiverType> {
        let mut types: Vec<_> = self.senders.keys().copied().collect();
        types.sort_by_key(|rt| rt.as_str());
        types
    }
}

#[derive(Default)]
pub struct SenderRegistryBuilder {
    senders: HashMap<ReceiverType, Arc<dyn Sender>>,
}

impl SenderRegistryBuilder {
    pub fn register(mut self, receiver_type: ReceiverType, sender: impl Sender + 'static) -> Self {
        self.senders.insert(receiver_type, Arc::new(sender));
        self
    }

    pub fn build(self) -> SenderRegistry {
        SenderRegistry {
            senders: self.senders,
        }
    }
}

/// Addresses of most channels are a single JSON string.
pub(crate) fn address_str(address: &Value) -> Result<&str, Error> {
    address
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("cannot unmarshal address {}", address))
}

pub(crate) fn decode_data<T: DeserializeOwned>(data: &Value, channel: &str) -> Result<T, Error> {
    T::deserialize(data).map_err(|e| anyhow!("cannot unmarshal {} data {}: {}", channel, data, e))
}
