use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    error::retriable,
    models::message::PagerDutyMessage,
    senders::{Sender, address_str, decode_data},
};

/// Events API v2 acknowledgement.
#[derive(Debug, Default, Deserialize)]
struct EnqueueResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    dedup_key: String,
    #[serde(default)]
    errors: Vec<String>,
}

/// Enqueues events with the PagerDuty Events API. The receiver address is the
/// integration routing key.
pub struct PagerDutySender {
    http_client: Client,
    endpoint: String,
}

impl PagerDutySender {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("cannot build pagerduty http client: {}", e))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Sender for PagerDutySender {
    async fn send(&self, address: &Value, data: &Value, instance: &str) -> Result<(), Error> {
        let routing_key = address_str(address)?;
        let mut message: PagerDutyMessage = decode_data(data, "pagerduty")?;
        message.routing_key = routing_key.to_string();

        debug!(instance, action = %message.event_action, "Sending PagerDuty event");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(|e| anyhow!("unable to send event to pagerduty: {}", e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let reply: EnqueueResponse = serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!(error = %e, "PagerDuty reply is not JSON");
            EnqueueResponse::default()
        });

        if status == StatusCode::BAD_REQUEST {
            warn!(instance, errors = ?reply.errors, "PagerDuty rejected event");
            return Err(anyhow!(
                "pagerduty rejected event: {} {:?}",
                reply.message,
                reply.errors
            ));
        }

        if status.as_u16() < 200 || status.as_u16() > 400 {
            warn!(instance, status = status.as_u16(), "PagerDuty unavailable");
            return Err(retriable(anyhow!(
                "pagerduty returned {}: {}",
                status,
                text
            )));
        }

        info!(
            instance,
            status = %reply.status,
            dedup_key = %reply.dedup_key,
            "PagerDuty event accepted"
        );
        Ok(())
    }
}
