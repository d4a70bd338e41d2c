use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::{Client, NoTls, types::Json};
use tracing::{debug, error, info, warn};

use crate::{
    clients::store::{EventStore, ReceiverStore},
    models::event::{Event, Receiver},
};

pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl ReceiverStore for DatabaseClient {
    async fn receivers_for_event(
        &self,
        instance_id: &str,
        event_type: &str,
    ) -> Result<Vec<Receiver>, Error> {
        let rows = self
            .client
            .query(
                r#"
                SELECT r.receiver_id::text, r.receiver_type, r.instance_id, r.address_data,
                    array_remove(array_agg(rt.event_type), NULL)
                FROM receivers r
                LEFT JOIN receiver_event_types rt ON (r.receiver_id = rt.receiver_id)
                WHERE r.instance_id = $1 AND rt.event_type = $2
                GROUP BY r.receiver_id
                "#,
                &[&instance_id, &event_type],
            )
            .await
            .map_err(|e| anyhow!("cannot select receivers for event: {}", e))?;

        let mut receivers = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get(0)?;
            let receiver_type: String = row.try_get(1)?;

            let Ok(receiver_type) = receiver_type.parse() else {
                warn!(receiver_id = %id, receiver_type = %receiver_type, "Skipping receiver of unknown type");
                continue;
            };

            let address: Option<Json<Value>> = row.try_get(3)?;
            receivers.push(Receiver {
                id,
                receiver_type,
                instance_id: row.try_get(2)?,
                address: address.map(|json| json.0).unwrap_or(Value::Null),
                event_types: row.try_get(4)?,
            });
        }

        debug!(
            instance_id,
            event_type,
            count = receivers.len(),
            "Receivers loaded for event"
        );

        Ok(receivers)
    }
}

#[async_trait]
impl EventStore for DatabaseClient {
    async fn create_event(&self, event: &Event) -> Result<String, Error> {
        let messages: Json<&HashMap<String, Value>> = Json(&event.messages);
        let metadata: Json<&HashMap<String, String>> = Json(&event.metadata);

        let row = self
            .client
            .query_one(
                r#"
                INSERT INTO events (event_type, instance_id, timestamp, messages, text, metadata)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING event_id::text
                "#,
                &[
                    &event.event_type,
                    &event.instance_id,
                    &event.timestamp,
                    &messages,
                    &event.text,
                    &metadata,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    event_type = %event.event_type,
                    "Failed to write event to database"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        let id: String = row.try_get(0)?;
        debug!(event_id = %id, event_type = %event.event_type, "Event written to database");
        Ok(id)
    }
}
