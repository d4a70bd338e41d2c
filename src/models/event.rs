use std::{collections::HashMap, fmt, str::FromStr};

use anyhow::{Error, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverType {
    Browser,
    Email,
    Slack,
    Stackdriver,
    Opsgenie,
    Pagerduty,
}

impl ReceiverType {
    pub const ALL: [ReceiverType; 6] = [
        ReceiverType::Browser,
        ReceiverType::Email,
        ReceiverType::Slack,
        ReceiverType::Stackdriver,
        ReceiverType::Opsgenie,
        ReceiverType::Pagerduty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverType::Browser => "browser",
            ReceiverType::Email => "email",
            ReceiverType::Slack => "slack",
            ReceiverType::Stackdriver => "stackdriver",
            ReceiverType::Opsgenie => "opsgenie",
            ReceiverType::Pagerduty => "pagerduty",
        }
    }
}

impl fmt::Display for ReceiverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiverType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReceiverType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| anyhow!("unknown receiver type {}", s))
    }
}

/// A tenant-scoped occurrence, carrying one pre-rendered message per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub instance_id: String,

    #[serde(default)]
    pub instance_name: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Keyed by receiver type name. Unknown keys are carried but never fanned out.
    #[serde(default)]
    pub messages: HashMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Rendered payload for a channel; `null` counts as absent.
    pub fn message_for(&self, receiver_type: ReceiverType) -> Option<&Value> {
        self.messages
            .get(receiver_type.as_str())
            .filter(|value| !value.is_null())
    }
}

/// A configured delivery target owned by a tenant instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receiver {
    pub id: String,

    #[serde(rename = "type")]
    pub receiver_type: ReceiverType,

    pub instance_id: String,

    /// Channel specific: an email address, a webhook URL, a service-account document, an API key.
    pub address: Value,

    #[serde(default)]
    pub event_types: Vec<String>,
}

/// One (receiver, event) delivery obligation. This is the queue message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub receiver_type: ReceiverType,
    pub instance_id: String,
    pub address: Value,
    pub data: Value,
    pub event: Event,
}
