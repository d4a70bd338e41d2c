use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use notification_pipeline::{
    api::{EventApi, event_routes},
    clients::{
        memory_queue::MemoryQueue,
        store::{MemoryStore, StaticDirectory},
    },
    events::EventManager,
    fanout::{NotificationBuilder, ReceiverResolver},
    gateway::ORG_ID_HEADER,
    models::event::ReceiverType,
    producer::BatchProducer,
    rate_limit::RateLimiter,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::common::receiver;

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    manager: EventManager,
}

fn harness(limiter: RateLimiter) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.add_receiver(receiver(
        "r-slack",
        ReceiverType::Slack,
        "org1",
        json!("https://hooks.slack.com/services/X"),
        &["deploy"],
    ));

    let queue = Arc::new(MemoryQueue::new(Duration::from_millis(20), Duration::from_secs(5)));
    let builder = NotificationBuilder::new(ReceiverResolver::new(store.clone()));
    let manager = EventManager::new(store.clone(), builder, BatchProducer::new(queue.clone(), 10));

    let names = HashMap::from([("org1".to_string(), "Org One".to_string())]);
    let api = EventApi {
        manager: manager.clone(),
        directory: Arc::new(StaticDirectory::new(names, true)),
        ui_url: "https://ui.example.com".to_string(),
    };

    Harness {
        app: event_routes(api, Arc::new(limiter)),
        store,
        queue,
        manager,
    }
}

fn post(uri: &str, org_id: Option<&str>, body: &str) -> Result<Request<Body>> {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(org_id) = org_id {
        request = request.header(ORG_ID_HEADER, org_id);
    }

    Ok(request.body(Body::from(body.to_string()))?)
}

async fn json_body(response: axum::response::Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn relaxed() -> RateLimiter {
    RateLimiter::new(100, 100)
}

/// Test: Tenant events without the tenant header are rejected
#[tokio::test]
async fn test_event_requires_tenant_header() -> Result<()> {
    let harness = harness(relaxed());

    let response = harness
        .app
        .oneshot(post("/api/notification/events", None, r#"{"type":"deploy"}"#)?)
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await?;
    assert_eq!(body["success"], false);
    assert!(harness.store.events().is_empty());

    Ok(())
}

/// Test: Undecodable bodies are rejected before anything is stored
#[tokio::test]
async fn test_malformed_event_is_bad_request() -> Result<()> {
    let harness = harness(relaxed());

    let response = harness
        .app
        .oneshot(post("/api/notification/events", Some("org1"), "{not json")?)
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.store.events().is_empty());

    Ok(())
}

/// Test: An accepted event is stored under the header's tenant and fanned out
#[tokio::test]
async fn test_event_is_stored_and_enqueued() -> Result<()> {
    let harness = harness(relaxed());
    let body = json!({
        "type": "deploy",
        "messages": {"slack": {"text": "deployed"}}
    });

    let response = harness
        .app
        .oneshot(post("/api/notification/events", Some("org1"), &body.to_string())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let reply = json_body(response).await?;
    let id = reply["data"]["id"]
        .as_str()
        .ok_or_else(|| anyhow!("missing event id"))?;
    assert!(!id.is_empty());

    harness.manager.wait().await;

    let events = harness.store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].instance_id, "org1");
    assert_eq!(events[0].instance_name, "Org One");
    assert_eq!(harness.queue.len(), 1);

    Ok(())
}

/// Test: Unknown instances are reported as not found
#[tokio::test]
async fn test_unknown_instance_is_not_found() -> Result<()> {
    let harness = harness(relaxed());

    let response = harness
        .app
        .oneshot(post("/api/notification/testevent", Some("org9"), "")?)
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

/// Test: Slack webhooks are rendered for every channel
#[tokio::test]
async fn test_slack_webhook_renders_all_channels() -> Result<()> {
    let harness = harness(relaxed());
    let body = json!({"text": "Deployed <https://ci.example.com/1|build 1>"});

    let response = harness
        .app
        .oneshot(post(
            "/api/notification/slack/org1/deploy",
            None,
            &body.to_string(),
        )?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    harness.manager.wait().await;

    let events = harness.store.events();
    assert_eq!(events.len(), 1);
    for channel in ["slack", "email", "browser", "stackdriver"] {
        assert!(
            events[0].messages.contains_key(channel),
            "missing {} message",
            channel
        );
    }
    assert!(!events[0].messages.contains_key("opsgenie"));

    Ok(())
}

/// Test: Requests beyond the limit get 429 with a retry hint
#[tokio::test]
async fn test_rate_limited_request_is_rejected() -> Result<()> {
    let harness = harness(RateLimiter::new(1, 1));
    let body = json!({"type": "deploy", "instance_id": "org1"}).to_string();

    let first = harness
        .app
        .clone()
        .oneshot(post("/api/notification/external/events", None, &body)?)
        .await?;
    assert_eq!(first.status(), StatusCode::OK);

    let second = harness
        .app
        .clone()
        .oneshot(post("/api/notification/external/events", None, &body)?)
        .await?;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key(header::RETRY_AFTER));

    // Health checks are never limited.
    let health = harness
        .app
        .oneshot(
            Request::builder()
                .uri("/api/notification/events/healthcheck")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(health.status(), StatusCode::OK);

    Ok(())
}
