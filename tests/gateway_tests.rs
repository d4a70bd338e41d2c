use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use futures_util::StreamExt;
use notification_pipeline::{
    api::sender_routes,
    clients::pubsub::{MemoryPubSub, PubSub},
    gateway::{Gateway, ORG_ID_HEADER},
};
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};

use crate::common::eventually;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(pubsub: Arc<MemoryPubSub>) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = sender_routes(Gateway::new(pubsub, Duration::from_secs(30)));

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(addr)
}

async fn connect(addr: SocketAddr, org_id: Option<&'static str>) -> Result<Client> {
    let mut request = format!("ws://{}/api/notification/sender", addr).into_client_request()?;
    if let Some(org_id) = org_id {
        request
            .headers_mut()
            .insert(ORG_ID_HEADER, HeaderValue::from_static(org_id));
    }

    let (client, _) = connect_async(request).await?;
    Ok(client)
}

async fn next_text(client: &mut Client) -> Result<String> {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await?
            .ok_or_else(|| anyhow!("connection closed"))??;

        if let Message::Text(text) = message {
            return Ok(text.as_str().to_string());
        }
    }
}

/// Test: Messages published for a tenant reach its socket, newline-terminated
#[tokio::test]
async fn test_published_message_reaches_socket() -> Result<()> {
    let pubsub = Arc::new(MemoryPubSub::new());
    let addr = serve(pubsub.clone()).await?;

    let mut client = connect(addr, Some("org1")).await?;
    assert!(eventually(Duration::from_secs(1), || pubsub.subscriber_count("org1") == 1).await);

    pubsub.publish("org1", br#"{"text":"deployed"}"#).await?;

    assert_eq!(next_text(&mut client).await?, "{\"text\":\"deployed\"}\n");

    Ok(())
}

/// Test: Tenants only see their own notifications
#[tokio::test]
async fn test_other_tenants_are_isolated() -> Result<()> {
    let pubsub = Arc::new(MemoryPubSub::new());
    let addr = serve(pubsub.clone()).await?;

    let mut org1 = connect(addr, Some("org1")).await?;
    let mut org2 = connect(addr, Some("org2")).await?;
    assert!(eventually(Duration::from_secs(1), || pubsub.subscriber_count("org2") == 1).await);

    pubsub.publish("org2", b"for org2").await?;
    assert_eq!(next_text(&mut org2).await?, "for org2\n");

    assert!(
        timeout(Duration::from_millis(200), org1.next()).await.is_err(),
        "org1 must not receive org2's messages"
    );

    Ok(())
}

/// Test: Connections without a tenant id are refused
#[tokio::test]
async fn test_missing_tenant_is_unauthorized() -> Result<()> {
    let pubsub = Arc::new(MemoryPubSub::new());
    let addr = serve(pubsub.clone()).await?;

    let err = connect(addr, None)
        .await
        .err()
        .ok_or_else(|| anyhow!("upgrade must be refused"))?;
    assert!(err.to_string().contains("401"), "unexpected error: {}", err);

    Ok(())
}

/// Test: Closing the socket releases the subscription
#[tokio::test]
async fn test_disconnect_unsubscribes() -> Result<()> {
    let pubsub = Arc::new(MemoryPubSub::new());
    let addr = serve(pubsub.clone()).await?;

    let mut client = connect(addr, Some("org1")).await?;
    assert!(eventually(Duration::from_secs(1), || pubsub.subscriber_count("org1") == 1).await);

    client.close(None).await?;
    drop(client);

    assert!(eventually(Duration::from_secs(2), || pubsub.subscriber_count("org1") == 0).await);

    Ok(())
}
