use anyhow::{Result, anyhow};
use notification_pipeline::{
    error::is_retriable,
    senders::{Sender, StackdriverSender, stackdriver::is_retriable_failure},
};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

const SERVICE_ACCOUNT_1: &str = include_str!("fixtures/service_account_1.json");
const SERVICE_ACCOUNT_2: &str = include_str!("fixtures/service_account_2.json");

fn entry() -> Value {
    json!({
        "timestamp": "2024-01-01T00:00:00Z",
        "payload": {"text": "deployed"},
        "labels": {"instance": "org1", "event_type": "deploy"}
    })
}

fn sender() -> StackdriverSender {
    // Nothing listens on the discard port, so token fetches fail fast.
    StackdriverSender::new(Client::new(), "http://127.0.0.1:9", "notifications")
}

/// Test: Only unavailable, unknown, data loss and exhausted quota are retriable
#[test]
fn test_write_failure_classification() {
    let body = |status: &str| json!({"error": {"code": 0, "status": status}}).to_string();

    assert!(is_retriable_failure(StatusCode::SERVICE_UNAVAILABLE, &body("UNAVAILABLE")));
    assert!(is_retriable_failure(StatusCode::INTERNAL_SERVER_ERROR, &body("UNKNOWN")));
    assert!(is_retriable_failure(StatusCode::INTERNAL_SERVER_ERROR, &body("DATA_LOSS")));
    assert!(is_retriable_failure(StatusCode::TOO_MANY_REQUESTS, &body("RESOURCE_EXHAUSTED")));

    assert!(!is_retriable_failure(StatusCode::INTERNAL_SERVER_ERROR, &body("INTERNAL")));
    assert!(!is_retriable_failure(StatusCode::FORBIDDEN, &body("PERMISSION_DENIED")));
    assert!(!is_retriable_failure(StatusCode::BAD_REQUEST, &body("INVALID_ARGUMENT")));

    assert!(is_retriable_failure(StatusCode::SERVICE_UNAVAILABLE, "upstream connect error"));
    assert!(is_retriable_failure(StatusCode::TOO_MANY_REQUESTS, ""));
    assert!(!is_retriable_failure(StatusCode::NOT_FOUND, ""));
}

/// Test: One client is cached per private key id
#[tokio::test]
async fn test_clients_cached_by_private_key_id() -> Result<()> {
    let sender = sender();
    let first: Value = serde_json::from_str(SERVICE_ACCOUNT_1)?;
    let second: Value = serde_json::from_str(SERVICE_ACCOUNT_2)?;

    let _ = sender.send(&first, &entry(), "org1").await;
    let _ = sender.send(&first, &entry(), "org1").await;
    assert_eq!(sender.cached_clients(), 1);

    // The key file may also arrive JSON-encoded as a string.
    let _ = sender
        .send(&json!(SERVICE_ACCOUNT_1), &entry(), "org1")
        .await;
    assert_eq!(sender.cached_clients(), 1);

    let _ = sender.send(&second, &entry(), "org1").await;
    assert_eq!(sender.cached_clients(), 2);

    Ok(())
}

/// Test: Authentication failures are permanent
#[tokio::test]
async fn test_token_failure_is_permanent() -> Result<()> {
    let address: Value = serde_json::from_str(SERVICE_ACCOUNT_1)?;

    let err = sender()
        .send(&address, &entry(), "org1")
        .await
        .err()
        .ok_or_else(|| anyhow!("token fetch must fail"))?;
    assert!(!is_retriable(&err));

    Ok(())
}

/// Test: Key files without ids are rejected and not cached
#[tokio::test]
async fn test_incomplete_service_file_is_rejected() -> Result<()> {
    let sender = sender();

    let err = sender
        .send(&json!({"project_id": "p"}), &entry(), "org1")
        .await
        .err()
        .ok_or_else(|| anyhow!("missing private_key_id must fail"))?;
    assert!(!is_retriable(&err));

    let err = sender
        .send(&json!("not json"), &entry(), "org1")
        .await
        .err()
        .ok_or_else(|| anyhow!("unparseable key file must fail"))?;
    assert!(!is_retriable(&err));

    assert_eq!(sender.cached_clients(), 0);

    Ok(())
}
