use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    error::retriable,
    models::message::StackdriverMessage,
    senders::{Sender, decode_data},
};

const LOGGING_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/logging.write";

/// Status codes Cloud Logging documents as safe to retry.
const RETRIABLE_STATUSES: [&str; 4] = ["UNAVAILABLE", "UNKNOWN", "DATA_LOSS", "RESOURCE_EXHAUSTED"];

#[derive(Debug, Deserialize)]
struct ServiceFile {
    #[serde(default)]
    private_key_id: String,
    #[serde(default)]
    project_id: String,
}

struct LoggingClient {
    project_id: String,
    credentials: CustomServiceAccount,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorReply {
    error: Option<ErrorStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    status: String,
}

/// Writes structured log entries to Cloud Logging. The receiver address is
/// a service-account key file; one authenticated client is kept per
/// `private_key_id`.
pub struct StackdriverSender {
    http_client: Client,
    endpoint: String,
    log_id: String,
    clients: Mutex<HashMap<String, Arc<LoggingClient>>>,
}

impl StackdriverSender {
    pub fn new(http_client: Client, endpoint: impl Into<String>, log_id: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            log_id: log_id.into(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.lock().len()
    }

    fn client_for(&self, address: &Value) -> Result<Arc<LoggingClient>, Error> {
        // The key file arrives either inline or as a JSON-encoded string.
        let content = match address {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };

        let service_file: ServiceFile = serde_json::from_str(&content)
            .map_err(|e| anyhow!("cannot unmarshal service file content: {}", e))?;

        if service_file.private_key_id.is_empty() || service_file.project_id.is_empty() {
            return Err(anyhow!(
                "private_key_id and project_id cannot be empty in service file"
            ));
        }

        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&service_file.private_key_id) {
            return Ok(client.clone());
        }

        let credentials = CustomServiceAccount::from_json(&content)
            .map_err(|e| anyhow!("failed to read the credentials from service file: {}", e))?;

        let client = Arc::new(LoggingClient {
            project_id: service_file.project_id,
            credentials,
        });
        clients.insert(service_file.private_key_id.clone(), client.clone());

        info!(
            private_key_id = %service_file.private_key_id,
            "Stackdriver client created"
        );
        Ok(client)
    }

    fn write_request(&self, project_id: &str, entry: &StackdriverMessage) -> Value {
        let mut log_entry = json!({
            "timestamp": entry.timestamp,
            "labels": entry.labels,
        });

        match &entry.payload {
            Value::String(text) => log_entry["textPayload"] = json!(text),
            other => log_entry["jsonPayload"] = other.clone(),
        }

        json!({
            "logName": format!("projects/{}/logs/{}", project_id, self.log_id),
            "resource": { "type": "global" },
            "entries": [log_entry],
        })
    }
}

/// Whether a failed write may succeed if repeated.
pub fn is_retriable_failure(status: StatusCode, body: &str) -> bool {
    let reply: ErrorReply = serde_json::from_str(body).unwrap_or_default();

    match reply.error.map(|e| e.status).filter(|s| !s.is_empty()) {
        Some(code) => RETRIABLE_STATUSES.contains(&code.as_str()),
        None => matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::SERVICE_UNAVAILABLE
        ),
    }
}

#[async_trait]
impl Sender for StackdriverSender {
    async fn send(&self, address: &Value, data: &Value, instance: &str) -> Result<(), Error> {
        let client = self
            .client_for(address)
            .map_err(|e| anyhow!("cannot get stackdriver client for service file: {}", e))?;

        let entry: StackdriverMessage = decode_data(data, "stackdriver")?;

        let token = client
            .credentials
            .token(&[LOGGING_WRITE_SCOPE])
            .await
            .map_err(|e| anyhow!("cannot authenticate with stackdriver: {}", e))?;

        let body = self.write_request(&client.project_id, &entry);
        debug!(instance, project_id = %client.project_id, "Writing Stackdriver entry");

        let response = self
            .http_client
            .post(format!("{}/v2/entries:write", self.endpoint))
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| retriable(anyhow!("cannot reach stackdriver: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        warn!(instance, status = status.as_u16(), body = %text, "Stackdriver write failed");

        if is_retriable_failure(status, &text) {
            Err(retriable(anyhow!(
                "internal server error logging to stackdriver: {} {}",
                status,
                text
            )))
        } else {
            Err(anyhow!("error logging to stackdriver: {} {}", status, text))
        }
    }
}
