use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,

    #[serde(default)]
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlackAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,

    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<SlackAttachment>,
    pub timestamp: DateTime<Utc>,
}

/// A structured log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackdriverMessage {
    #[serde(default = "Utc::now", alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Either a JSON string (text payload) or a JSON object.
    #[serde(alias = "Payload")]
    pub payload: Value,

    #[serde(default, alias = "Labels")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpsGenieMessage {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// `closed` or `resolved` closes the alert identified by `alias`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Fields not listed above (`responders`, `visibleTo`, ...), forwarded unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpsGenieMessage {
    pub fn closes_alert(&self) -> bool {
        let closing = matches!(
            self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("closed") | Some("resolved")
        );
        closing && self.alias.as_deref().is_some_and(|alias| !alias.is_empty())
    }
}

/// PagerDuty Events API v2 body. `routing_key` is filled from the receiver address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagerDutyMessage {
    #[serde(default)]
    pub routing_key: String,

    pub event_action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PagerDutyPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagerDutyPayload {
    pub summary: String,
    pub source: String,
    pub severity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_details: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
