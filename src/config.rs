use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::BackoffConfig;

/// Which half of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Ingestion API, fan-out and batch producer.
    Eventmanager,
    /// Queue dispatcher, channel senders and browser gateway.
    Sender,
    All,
}

impl Role {
    pub fn runs_event_manager(&self) -> bool {
        matches!(self, Role::Eventmanager | Role::All)
    }

    pub fn runs_sender(&self) -> bool {
        matches!(self, Role::Sender | Role::All)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_role")]
    pub role: Role,

    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_memory_url")]
    pub queue_url: String,
    pub sqs_endpoint: Option<String>,
    #[serde(default = "default_queue_wait_time_seconds")]
    pub queue_wait_time_seconds: u64,
    #[serde(default = "default_queue_visibility_timeout_seconds")]
    pub queue_visibility_timeout_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_memory_url")]
    pub pubsub_url: String,

    pub database_url: Option<String>,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_burst: u32,

    /// Base URL of the tenant UI, used for links in rendered messages.
    #[serde(default = "default_ui_url")]
    pub ui_url: String,

    #[serde(default = "default_slack_username")]
    pub slack_username: String,

    #[serde(default = "default_email_uri")]
    pub email_uri: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,
    pub email_reply_to: Option<String>,

    #[serde(default = "default_stackdriver_log_id")]
    pub stackdriver_log_id: String,
    #[serde(default = "default_stackdriver_endpoint")]
    pub stackdriver_endpoint: String,

    #[serde(default = "default_opsgenie_url")]
    pub opsgenie_url: String,
    #[serde(default = "default_opsgenie_timeout_seconds")]
    pub opsgenie_timeout_seconds: u64,
    #[serde(default = "default_opsgenie_initial_delay_ms")]
    pub opsgenie_initial_delay_ms: u64,

    #[serde(default = "default_pagerduty_url")]
    pub pagerduty_url: String,
    #[serde(default = "default_pagerduty_timeout_seconds")]
    pub pagerduty_timeout_seconds: u64,

    #[serde(default = "default_browser_ping_seconds")]
    pub browser_ping_seconds: u64,
}

fn default_role() -> Role {
    Role::All
}

fn default_server_port() -> u16 {
    8080
}

fn default_memory_url() -> String {
    "memory://".to_string()
}

fn default_queue_wait_time_seconds() -> u64 {
    20
}

fn default_queue_visibility_timeout_seconds() -> u64 {
    60
}

fn default_batch_size() -> usize {
    10
}

fn default_rate_limit() -> u32 {
    100
}

fn default_ui_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_slack_username() -> String {
    "Notification Service".to_string()
}

fn default_email_uri() -> String {
    "log://".to_string()
}

fn default_email_from() -> String {
    "Notifications <notifications@localhost>".to_string()
}

fn default_stackdriver_log_id() -> String {
    "notifications".to_string()
}

fn default_stackdriver_endpoint() -> String {
    "https://logging.googleapis.com".to_string()
}

fn default_opsgenie_url() -> String {
    "https://api.opsgenie.com".to_string()
}

fn default_opsgenie_timeout_seconds() -> u64 {
    300
}

fn default_opsgenie_initial_delay_ms() -> u64 {
    1000
}

fn default_pagerduty_url() -> String {
    "https://events.pagerduty.com/v2/enqueue".to_string()
}

fn default_pagerduty_timeout_seconds() -> u64 {
    60
}

fn default_browser_ping_seconds() -> u64 {
    30
}

/// SQS accepts at most ten entries per batch-send call.
pub const MAX_BATCH_SIZE: usize = 10;

/// SQS visibility timeouts are limited to twelve hours.
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = 43_200;

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    /// Builds a config from `KEY=value` pairs named like the environment variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(anyhow!(
                "BATCH_SIZE must be between 1 and {}, got {}",
                MAX_BATCH_SIZE,
                self.batch_size
            ));
        }

        if self.rate_limit_per_second == 0 || self.rate_limit_burst == 0 {
            return Err(anyhow!("RATE_LIMIT_PER_SECOND and RATE_LIMIT_BURST must be positive"));
        }

        if self.queue_wait_time_seconds > 20 {
            return Err(anyhow!("QUEUE_WAIT_TIME_SECONDS cannot exceed 20"));
        }

        if self.queue_visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(anyhow!(
                "QUEUE_VISIBILITY_TIMEOUT_SECONDS cannot exceed {}, got {}",
                MAX_VISIBILITY_TIMEOUT_SECONDS,
                self.queue_visibility_timeout_seconds
            ));
        }

        if self.browser_ping_seconds == 0 {
            return Err(anyhow!("BROWSER_PING_SECONDS must be positive"));
        }

        Ok(())
    }

    pub fn queue_wait_time(&self) -> Duration {
        Duration::from_secs(self.queue_wait_time_seconds)
    }

    pub fn queue_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_visibility_timeout_seconds)
    }

    pub fn opsgenie_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.opsgenie_initial_delay_ms),
            timeout: Duration::from_secs(self.opsgenie_timeout_seconds),
        }
    }

    pub fn pagerduty_timeout(&self) -> Duration {
        Duration::from_secs(self.pagerduty_timeout_seconds)
    }

    pub fn browser_ping_period(&self) -> Duration {
        Duration::from_secs(self.browser_ping_seconds)
    }
}
