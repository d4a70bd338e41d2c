//! Browser fan-out: streams a tenant's published notifications to its live
//! websocket connections.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    clients::pubsub::{PubSub, Subscription},
    metrics::{self, ConnectionGauge},
};

/// Header carrying the authenticated tenant id.
pub const ORG_ID_HEADER: &str = "X-Scope-OrgID";

const WRITE_WAIT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Gateway {
    pubsub: Arc<dyn PubSub>,
    ping_period: Duration,
}

impl Gateway {
    pub fn new(pubsub: Arc<dyn PubSub>, ping_period: Duration) -> Self {
        Self {
            pubsub,
            ping_period,
        }
    }
}

pub fn org_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ORG_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Subscribes to the tenant topic, then upgrades. A pub-sub failure is
/// answered with 500 before any upgrade.
pub async fn browser_socket(
    ws: WebSocketUpgrade,
    State(gateway): State<Gateway>,
    headers: HeaderMap,
) -> Response {
    let Some(org_id) = org_id(&headers).map(str::to_string) else {
        warn!("Websocket request without tenant id");
        metrics::record_request_error(StatusCode::UNAUTHORIZED.as_u16());
        return (StatusCode::UNAUTHORIZED, "missing tenant id").into_response();
    };

    let subscription = match gateway.pubsub.subscribe(&org_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(org_id = %org_id, error = %e, "Cannot subscribe to tenant topic");
            metrics::record_subscriber_error();
            return (StatusCode::INTERNAL_SERVER_ERROR, "cannot subscribe").into_response();
        }
    };

    let ping_period = gateway.ping_period;
    ws.on_upgrade(move |socket| stream_notifications(socket, subscription, org_id, ping_period))
}

async fn stream_notifications(
    socket: WebSocket,
    mut subscription: Subscription,
    org_id: String,
    ping_period: Duration,
) {
    let _gauge = ConnectionGauge::open();
    let (mut sink, mut client) = socket.split();

    info!(org_id = %org_id, "Browser connected");

    let mut reader = tokio::spawn(async move {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Websocket read failed");
                    break;
                }
            }
        }
    });

    let mut ping = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            published = subscription.next() => {
                let Some(payload) = published else {
                    warn!(org_id = %org_id, "Subscription ended");
                    break;
                };

                let mut text = String::from_utf8_lossy(&payload).into_owned();
                text.push('\n');

                match timeout(WRITE_WAIT, sink.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => metrics::record_browser_delivery(true),
                    Ok(Err(e)) => {
                        debug!(org_id = %org_id, error = %e, "Websocket write failed");
                        metrics::record_browser_delivery(false);
                        metrics::record_websocket_error();
                        break;
                    }
                    Err(_) => {
                        debug!(org_id = %org_id, "Websocket write timed out");
                        metrics::record_browser_delivery(false);
                        metrics::record_websocket_error();
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if !matches!(timeout(WRITE_WAIT, sink.send(Message::Ping(Default::default()))).await, Ok(Ok(()))) {
                    debug!(org_id = %org_id, "Websocket ping failed");
                    metrics::record_websocket_error();
                    break;
                }
            }
            _ = &mut reader => {
                debug!(org_id = %org_id, "Client closed connection");
                break;
            }
        }
    }

    reader.abort();
    drop(subscription);
    let _ = timeout(WRITE_WAIT, sink.close()).await;

    info!(org_id = %org_id, "Browser disconnected");
}
