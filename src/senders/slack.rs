use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    error::retriable,
    senders::{Sender, address_str, decode_data},
};

/// Posts to Slack incoming webhooks. The receiver address is the webhook URL.
/// The payload is forwarded as given; only a missing `username` is filled in.
pub struct SlackSender {
    http_client: Client,
    username: String,
}

impl SlackSender {
    pub fn new(http_client: Client, username: impl Into<String>) -> Self {
        Self {
            http_client,
            username: username.into(),
        }
    }
}

#[async_trait]
impl Sender for SlackSender {
    async fn send(&self, address: &Value, data: &Value, instance: &str) -> Result<(), Error> {
        let webhook = address_str(address)?;
        let mut message: Map<String, Value> = decode_data(data, "slack")?;

        if !message.contains_key("username") {
            message.insert("username".to_string(), Value::String(self.username.clone()));
        }

        debug!(instance, "Posting Slack message");

        let response = self
            .http_client
            .post(webhook)
            .json(&message)
            .send()
            .await
            .map_err(|e| anyhow!("cannot post slack message: {}", e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(instance, status = status.as_u16(), body = %body, "Slack webhook rejected message");

            let err = anyhow!("request to slack failed; status {} from Slack", status);
            return if status.is_server_error() {
                Err(retriable(err))
            } else {
                Err(err)
            };
        }

        // Webhooks answer a plain `ok` when the message was posted.
        if status != StatusCode::OK || !body.starts_with("ok") {
            warn!(instance, status = status.as_u16(), body = %body, "Unexpected Slack reply");
            return Err(anyhow!(
                "unexpected status code: {} or response is not 'ok': {:?}",
                status.as_u16(),
                body
            ));
        }

        Ok(())
    }
}
