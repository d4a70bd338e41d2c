//! Prometheus metrics for the event manager and the sender.

use std::{sync::OnceLock, time::Duration};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::models::event::ReceiverType;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub mod names {
    // Ingestion
    pub const REQUESTS_TOTAL: &str = "incoming_event_requests_total";
    pub const REQUEST_ERRORS_TOTAL: &str = "incoming_event_request_errors_total";
    pub const RATE_LIMITED_TOTAL: &str = "rate_limited_event_requests_total";
    pub const EVENTS_STORED_TOTAL: &str = "events_to_db_total";
    pub const EVENTS_STORED_ERRORS_TOTAL: &str = "event_to_db_errors_total";
    pub const ENQUEUE_TOTAL: &str = "events_to_queue_total";
    pub const ENQUEUE_ERRORS_TOTAL: &str = "event_to_queue_errors_total";

    // Dispatch
    pub const RECEIVE_TOTAL: &str = "notifications_receive_from_queue_total";
    pub const RECEIVE_ERRORS_TOTAL: &str = "notification_receive_from_queue_errors_total";
    pub const DELETE_TOTAL: &str = "notifications_delete_from_queue_total";
    pub const NOTIFICATIONS_TOTAL: &str = "notifications_total";
    pub const NOTIFICATION_ERRORS_TOTAL: &str = "notification_errors_total";
    pub const RETRY_ERRORS_TOTAL: &str = "notification_retry_errors_total";
    pub const NO_RETRY_ERRORS_TOTAL: &str = "notification_no_retry_errors_total";
    pub const NOTIFICATIONS_IN_QUEUE: &str = "notifications_in_queue";
    pub const COMPLETED_DURATION_SECONDS: &str = "notification_completed_duration_seconds";

    // Browser
    pub const PUBLICATIONS_TOTAL: &str = "publications_total";
    pub const PUBLICATION_ERRORS_TOTAL: &str = "publication_errors_total";
    pub const SUBSCRIBERS: &str = "subscribers";
    pub const SUBSCRIBER_ERRORS_TOTAL: &str = "subscriber_errors_total";
    pub const WEBSOCKETS_TOTAL: &str = "notification_websockets_total";
    pub const WEBSOCKETS_ACTIVE: &str = "notification_active_websockets";
    pub const WEBSOCKET_ERRORS_TOTAL: &str = "notification_websocket_errors_total";
    pub const BROWSER_DELIVERIES_TOTAL: &str = "notifications_to_browser_total";
    pub const BROWSER_DELIVERY_ERRORS_TOTAL: &str = "notification_to_browser_errors_total";
}

/// Installs the Prometheus recorder. Returns `false` if it was already installed.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

pub fn record_request(handler: &'static str) {
    counter!(names::REQUESTS_TOTAL, "handler" => handler).increment(1);
}

pub fn record_request_error(status: u16) {
    counter!(names::REQUEST_ERRORS_TOTAL, "status_code" => status.to_string()).increment(1);
}

pub fn record_rate_limited(method: &str, path: &str) {
    counter!(
        names::RATE_LIMITED_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .increment(1);
}

pub fn record_event_stored(event_type: &str, ok: bool) {
    let name = if ok {
        names::EVENTS_STORED_TOTAL
    } else {
        names::EVENTS_STORED_ERRORS_TOTAL
    };
    counter!(name, "event_type" => event_type.to_string()).increment(1);
}

pub fn record_enqueue(event_type: &str, ok: bool) {
    let name = if ok {
        names::ENQUEUE_TOTAL
    } else {
        names::ENQUEUE_ERRORS_TOTAL
    };
    counter!(name, "event_type" => event_type.to_string()).increment(1);
}

pub fn record_enqueued(count: usize) {
    gauge!(names::NOTIFICATIONS_IN_QUEUE).increment(count as f64);
}

pub fn record_receive(ok: bool) {
    if ok {
        counter!(names::RECEIVE_TOTAL).increment(1);
    } else {
        counter!(names::RECEIVE_ERRORS_TOTAL).increment(1);
    }
}

pub fn record_notification(receiver_type: ReceiverType) {
    counter!(names::NOTIFICATIONS_TOTAL, "receiver_type" => receiver_type.as_str()).increment(1);
}

pub fn record_notification_error(receiver_type: &str) {
    counter!(names::NOTIFICATION_ERRORS_TOTAL, "receiver_type" => receiver_type.to_string())
        .increment(1);
}

pub fn record_retry_error(receiver_type: ReceiverType) {
    counter!(names::RETRY_ERRORS_TOTAL, "receiver_type" => receiver_type.as_str()).increment(1);
}

pub fn record_no_retry_error(receiver_type: ReceiverType) {
    counter!(names::NO_RETRY_ERRORS_TOTAL, "receiver_type" => receiver_type.as_str())
        .increment(1);
}

pub fn record_deleted(receiver_type: &str) {
    counter!(names::DELETE_TOTAL, "receiver_type" => receiver_type.to_string()).increment(1);
    gauge!(names::NOTIFICATIONS_IN_QUEUE).decrement(1.0);
}

pub fn record_completed(duration: Duration) {
    histogram!(names::COMPLETED_DURATION_SECONDS).record(duration.as_secs_f64());
}

pub fn record_publication(ok: bool) {
    if ok {
        counter!(names::PUBLICATIONS_TOTAL).increment(1);
    } else {
        counter!(names::PUBLICATION_ERRORS_TOTAL).increment(1);
    }
}

pub fn record_subscriber_error() {
    counter!(names::SUBSCRIBER_ERRORS_TOTAL).increment(1);
}

pub fn record_websocket_error() {
    counter!(names::WEBSOCKET_ERRORS_TOTAL).increment(1);
}

pub fn record_browser_delivery(ok: bool) {
    if ok {
        counter!(names::BROWSER_DELIVERIES_TOTAL).increment(1);
    } else {
        counter!(names::BROWSER_DELIVERY_ERRORS_TOTAL).increment(1);
    }
}

/// Tracks one live browser connection for as long as it is held.
pub struct ConnectionGauge;

impl ConnectionGauge {
    pub fn open() -> Self {
        counter!(names::WEBSOCKETS_TOTAL).increment(1);
        gauge!(names::WEBSOCKETS_ACTIVE).increment(1.0);
        gauge!(names::SUBSCRIBERS).increment(1.0);
        Self
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        gauge!(names::WEBSOCKETS_ACTIVE).decrement(1.0);
        gauge!(names::SUBSCRIBERS).decrement(1.0);
    }
}
