use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    models::{message::OpsGenieMessage, retry::BackoffConfig},
    senders::{Sender, address_str, decode_data},
    utils::{Poll, poll_with_backoff},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct AcceptedResponse {
    #[serde(rename = "requestId")]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct RequestStatusResponse {
    data: RequestStatus,
}

#[derive(Debug, Deserialize)]
struct RequestStatus {
    success: bool,
    #[serde(default)]
    status: String,
}

/// Creates or closes OpsGenie alerts. The API processes both asynchronously,
/// so delivery is confirmed by polling the request status. The receiver
/// address is the integration API key.
pub struct OpsGenieSender {
    http_client: Client,
    base_url: Url,
    backoff: BackoffConfig,
}

impl OpsGenieSender {
    pub fn new(base_url: &str, backoff: BackoffConfig) -> Result<Self, Error> {
        let base_url =
            Url::parse(base_url).map_err(|e| anyhow!("invalid opsgenie url {}: {}", base_url, e))?;

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow!("cannot build opsgenie http client: {}", e))?;

        Ok(Self {
            http_client,
            base_url,
            backoff,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("opsgenie url {} cannot be a base", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Submits the alert action and returns the id of the async request.
    async fn submit(&self, key: &str, alert: &OpsGenieMessage) -> Result<String, Error> {
        let request = if alert.closes_alert() {
            let alias = alert.alias.as_deref().unwrap_or_default();
            let mut url = self.endpoint(&["v2", "alerts", alias, "close"])?;
            url.query_pairs_mut().append_pair("identifierType", "alias");

            let mut body = json!({});
            for (field, value) in [("user", &alert.user), ("source", &alert.source), ("note", &alert.note)] {
                if let Some(value) = value {
                    body[field] = json!(value);
                }
            }

            debug!(alias, "Closing OpsGenie alert");
            self.http_client.post(url).json(&body)
        } else {
            let mut body = serde_json::to_value(alert)?;
            if let Some(fields) = body.as_object_mut() {
                fields.remove("status");
            }

            debug!(message = %alert.message, "Creating OpsGenie alert");
            self.http_client.post(self.endpoint(&["v2", "alerts"])?).json(&body)
        };

        let response = request
            .header("Authorization", format!("GenieKey {}", key))
            .send()
            .await
            .map_err(|e| anyhow!("cannot create OpsGenie alert {}: {}", alert.message, e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(
                "cannot create OpsGenie alert {}: {} {}",
                alert.message,
                status,
                text
            ));
        }

        let accepted: AcceptedResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("cannot read OpsGenie response {}: {}", text, e))?;

        Ok(accepted.request_id)
    }

    async fn request_status(&self, key: &str, request_id: &str) -> Result<Poll<()>, Error> {
        let url = self.endpoint(&["v2", "alerts", "requests", request_id])?;

        let response = self
            .http_client
            .get(url)
            .header("Authorization", format!("GenieKey {}", key))
            .send()
            .await
            .map_err(|e| anyhow!("cannot get opsGenie request status: {}", e))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        match status {
            StatusCode::NOT_FOUND | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                debug!(request_id, status = status.as_u16(), "OpsGenie request status not ready");
                Ok(Poll::Pending(format!("{}: {}", status, text)))
            }
            s if s.is_success() => {
                let reply: RequestStatusResponse = serde_json::from_str(&text)
                    .map_err(|e| anyhow!("cannot read opsGenie request status {}: {}", text, e))?;

                if reply.data.success {
                    Ok(Poll::Ready(()))
                } else {
                    Err(anyhow!("request is not successful, error: {}", reply.data.status))
                }
            }
            s => Err(anyhow!("cannot get opsGenie request status: {} {}", s, text)),
        }
    }
}

#[async_trait]
impl Sender for OpsGenieSender {
    async fn send(&self, address: &Value, data: &Value, instance: &str) -> Result<(), Error> {
        let key = address_str(address)?;
        let alert: OpsGenieMessage = decode_data(data, "opsgenie")?;

        let request_id = self.submit(key, &alert).await?;

        poll_with_backoff(&self.backoff, || self.request_status(key, &request_id))
            .await
            .map_err(|e| {
                warn!(instance, request_id = %request_id, error = %e, "OpsGenie request failed");
                anyhow!("opsGenie request {} failed: {}", request_id, e)
            })?;

        info!(instance, request_id = %request_id, "OpsGenie request processed");
        Ok(())
    }
}
