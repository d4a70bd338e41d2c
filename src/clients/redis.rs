use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info};

use crate::clients::pubsub::{PubSub, Subscription};

/// Pub-sub over Redis PUBLISH/SUBSCRIBE. Each subscription holds its own
/// connection, which is closed when the subscription is dropped.
pub struct RedisPubSub {
    client: Client,
    connection: MultiplexedConnection,
}

impl RedisPubSub {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis pub-sub");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self { client, connection })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        let mut connection = self.connection.clone();
        let receivers: i64 = connection
            .publish(topic, payload)
            .await
            .map_err(|e| anyhow!("Failed to publish to {}: {}", topic, e))?;

        debug!(topic, receivers, "Published to redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, Error> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| anyhow!("Failed to open redis pub-sub connection: {}", e))?;

        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| anyhow!("Failed to subscribe to {}: {}", topic, e))?;

        debug!(topic, "Subscribed to redis topic");

        let stream = pubsub
            .into_on_message()
            .map(|message| message.get_payload_bytes().to_vec());

        Ok(stream.boxed())
    }
}
