use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use notification_pipeline::{
    clients::queue::{NotificationQueue, QueueEntry},
    error::retriable,
    models::event::{Event, Notification, Receiver, ReceiverType},
    senders::Sender,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::{Instant, sleep};

/// What a [`RecordingSender`] does on its next call.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Deliver,
    FailRetriable,
    FailPermanent,
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentCall {
    pub address: Value,
    pub data: Value,
    pub instance: String,
}

/// Records every call and replays a script; delivers once the script runs out.
#[derive(Clone, Default)]
pub struct RecordingSender {
    calls: Arc<Mutex<Vec<SentCall>>>,
    script: Arc<Mutex<VecDeque<Step>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
        let sender = Self::default();
        sender.script.lock().extend(steps);
        sender
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send(&self, address: &Value, data: &Value, instance: &str) -> Result<(), Error> {
        self.calls.lock().push(SentCall {
            address: address.clone(),
            data: data.clone(),
            instance: instance.to_string(),
        });

        let step = self.script.lock().pop_front().unwrap_or(Step::Deliver);
        match step {
            Step::Deliver => Ok(()),
            Step::FailRetriable => Err(retriable(anyhow!("upstream unavailable"))),
            Step::FailPermanent => Err(anyhow!("address rejected")),
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn event(event_type: &str, instance_id: &str, messages: &[(ReceiverType, Value)]) -> Event {
    Event {
        id: String::new(),
        event_type: event_type.to_string(),
        instance_id: instance_id.to_string(),
        instance_name: format!("{} name", instance_id),
        timestamp: Utc::now(),
        messages: messages
            .iter()
            .map(|(rt, value)| (rt.to_string(), value.clone()))
            .collect(),
        text: None,
        metadata: HashMap::new(),
    }
}

pub fn receiver(id: &str, receiver_type: ReceiverType, instance_id: &str, address: Value, event_types: &[&str]) -> Receiver {
    Receiver {
        id: id.to_string(),
        receiver_type,
        instance_id: instance_id.to_string(),
        address,
        event_types: event_types.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn notification(receiver_type: ReceiverType, address: Value, data: Value) -> Notification {
    let event = event("deploy", "org1", &[(receiver_type, data.clone())]);
    Notification {
        receiver_type,
        instance_id: "org1".to_string(),
        address,
        data,
        event,
    }
}

pub async fn enqueue(queue: &dyn NotificationQueue, notifications: &[Notification]) -> Result<()> {
    let entries = notifications
        .iter()
        .enumerate()
        .map(|(i, n)| {
            Ok(QueueEntry {
                id: i.to_string(),
                body: serde_json::to_string(n)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    queue.send_batch(entries).await
}

/// Polls `condition` every 10ms until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}
