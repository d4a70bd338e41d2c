use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::{
    clients::store::InstanceDirectory,
    events::EventManager,
    gateway::{self, Gateway},
    metrics,
    models::{
        event::Event,
        message::SlackMessage,
        response::{ApiResponse, EventCreated},
        validation::{validate_event, validate_event_type, validate_instance_id},
    },
    rate_limit::{RateLimiter, rate_limit},
    render::{self, InstanceLinks},
};

/// Shared state of the ingestion endpoints.
#[derive(Clone)]
pub struct EventApi {
    pub manager: EventManager,
    pub directory: Arc<dyn InstanceDirectory>,
    pub ui_url: String,
}

/// Rejection rendered as an `ApiResponse` error body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_request_error(self.status.as_u16());

        let reason = self
            .status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string();

        (
            self.status,
            Json(ApiResponse::<()>::error(reason, self.message)),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<ApiResponse<EventCreated>>, ApiError>;

/// Routes for the given roles plus `/metrics`.
pub fn router(events: Option<EventApi>, gateway: Option<Gateway>, limiter: Arc<RateLimiter>) -> Router {
    let mut app = Router::new().route("/metrics", get(render_metrics));

    if let Some(events) = events {
        app = app.merge(event_routes(events, limiter));
    }

    if let Some(gateway) = gateway {
        app = app.merge(sender_routes(gateway));
    }

    app.layer(TraceLayer::new_for_http())
}

pub fn event_routes(api: EventApi, limiter: Arc<RateLimiter>) -> Router {
    let limited = Router::new()
        .route("/api/notification/events", post(create_event))
        .route("/api/notification/external/events", post(create_external_event))
        .route("/api/notification/testevent", post(create_test_event))
        .route(
            "/api/notification/slack/{instance_id}/{event_type}",
            post(create_slack_event),
        )
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit));

    Router::new()
        .merge(limited)
        .route("/api/notification/events/healthcheck", get(healthcheck))
        .with_state(api)
}

pub fn sender_routes(gateway: Gateway) -> Router {
    Router::new()
        .route("/api/notification/sender", get(gateway::browser_socket))
        .route("/api/notification/sender/healthcheck", get(healthcheck))
        .with_state(gateway)
}

async fn healthcheck() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn render_metrics() -> Response {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

impl EventApi {
    async fn instance_name(&self, instance_id: &str) -> Result<String, ApiError> {
        match self.directory.instance_name(instance_id).await {
            Ok(Some(name)) => Ok(name),
            Ok(None) => Err(ApiError::new(
                StatusCode::NOT_FOUND,
                format!("instance {} not found", instance_id),
            )),
            Err(e) => {
                error!(instance_id, error = %e, "Cannot resolve instance");
                Err(ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "unable to retrieve instance data",
                ))
            }
        }
    }

    async fn accept(&self, mut event: Event) -> ApiResult {
        validate_event(&event).map_err(|e| ApiError::bad_request(e.to_string()))?;

        if event.instance_name.is_empty() {
            event.instance_name = self.instance_name(&event.instance_id).await?;
        }

        let id = self.manager.store_and_send(event).await.map_err(|e| {
            error!(error = %e, "Failed to handle event");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to handle event")
        })?;

        Ok(Json(ApiResponse::success(
            EventCreated { id },
            "Event accepted".to_string(),
        )))
    }
}

fn required_org_id(headers: &HeaderMap) -> Result<String, ApiError> {
    gateway::org_id(headers).map(str::to_string).ok_or_else(|| {
        warn!("Request without tenant id");
        ApiError::new(StatusCode::UNAUTHORIZED, "missing tenant id")
    })
}

fn decode_event(body: &[u8]) -> Result<Event, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("cannot decode event: {}", e)))
}

/// Events posted by the tenant's own UI; the tenant comes from the auth header.
async fn create_event(State(api): State<EventApi>, headers: HeaderMap, body: Bytes) -> ApiResult {
    metrics::record_request("EventHandler");

    let org_id = required_org_id(&headers)?;
    let mut event = decode_event(&body)?;

    if event.instance_id.is_empty() {
        event.instance_id = org_id;
    }

    api.accept(event).await
}

/// Events from other services, which name the instance in the body.
async fn create_external_event(State(api): State<EventApi>, body: Bytes) -> ApiResult {
    metrics::record_request("ExternalEventHandler");

    let event = decode_event(&body)?;
    api.accept(event).await
}

async fn create_test_event(State(api): State<EventApi>, headers: HeaderMap) -> ApiResult {
    metrics::record_request("TestEventHandler");

    let org_id = required_org_id(&headers)?;
    let instance_name = api.instance_name(&org_id).await?;
    let links = InstanceLinks::for_event(&api.ui_url, &org_id, render::TEST_EVENT_TYPE);

    let event = render::test_event(&org_id, &instance_name, &links).map_err(|e| {
        error!(error = %e, "Cannot render test event");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "cannot render test event")
    })?;

    api.accept(event).await
}

/// Slack-formatted webhook payloads, rendered for every channel.
async fn create_slack_event(
    State(api): State<EventApi>,
    Path((instance_id, event_type)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult {
    metrics::record_request("SlackHandler");

    validate_instance_id(&instance_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    validate_event_type(&event_type).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("cannot unmarshal body: {}", e)))?;
    let message: SlackMessage = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::bad_request(format!("cannot unmarshal body: {}", e)))?;

    debug!(instance_id = %instance_id, event_type = %event_type, "Slack event received");

    let instance_name = api.instance_name(&instance_id).await?;
    let links = InstanceLinks::for_event(&api.ui_url, &instance_id, &event_type);

    let event = render::event_from_slack(
        message,
        raw,
        &event_type,
        &instance_id,
        &instance_name,
        &links,
    )
    .map_err(|e| ApiError::bad_request(format!("cannot build event: {}", e)))?;

    api.accept(event).await
}
