//! End-to-end wiring of the transport core against in-memory stand-ins.
//!
//! Run with: cargo run -p post-office --example transport_demo

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::info;

use codec::{decode_parcel, ParcelEncoder};
use message_store::MemoryBackend;
use post_office::{
    PostConfig, PostOffice, SendOptions, StaticStampProvider, TaskId, TaskScheduler,
};
use types::{MessageType, OutboundMessage, SendPriority};

/// Stand-in for the embedder's task scheduler: wakeups arrive on a channel.
struct ChannelScheduler {
    wakeups: mpsc::UnboundedSender<TaskId>,
}

impl TaskScheduler for ChannelScheduler {
    fn schedule_now(&self, task: &TaskId) {
        let _ = self.wakeups.send(task.clone());
    }

    fn schedule_periodic(&self, _task: &TaskId, _interval: Duration) {}

    fn cancel(&self, _task: &TaskId) {}
}

struct TopicSubscription {
    message_id: String,
    topic: String,
}

impl TopicSubscription {
    fn new(message_id: &str, topic: &str) -> Self {
        Self {
            message_id: message_id.to_owned(),
            topic: topic.to_owned(),
        }
    }
}

#[async_trait]
impl OutboundMessage for TopicSubscription {
    fn message_type(&self) -> MessageType {
        MessageType(62)
    }

    fn message_id(&self) -> &str {
        &self.message_id
    }

    async fn prepare(&self) -> anyhow::Result<Map<String, Value>> {
        let mut payload = Map::new();
        payload.insert("topic".to_owned(), Value::from(self.topic.clone()));
        Ok(payload)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (wakeup_tx, mut wakeups) = mpsc::unbounded_channel();
    let office = PostOffice::spawn(
        PostConfig::default(),
        Arc::new(MemoryBackend::new()),
        Arc::new(ChannelScheduler { wakeups: wakeup_tx }),
        Arc::new(
            StaticStampProvider::new()
                .with_field("instance_id", "demo-instance")
                .with_field("courier", "demo"),
        ),
    );

    let mut topic_updates = office.receive_messages(MessageType::TOPIC_STATUS);

    office.on_registration_complete()?;
    office
        .send_message(&TopicSubscription::new("sub-news", "news"))
        .await?;
    office
        .send_message_with(
            &TopicSubscription::new("sub-alerts", "alerts"),
            SendOptions::new().priority(SendPriority::Immediate),
        )
        .await?;

    // The IMMEDIATE send signals the sender task; play its role here.
    if let Some(task) = wakeups.recv().await {
        info!(%task, "sender task signaled");
        let encoder = ParcelEncoder::new();
        for parcel in office.collect_parcels().await {
            info!(json = %encoder.encode_stamped(&parcel), "sending parcel");
            office.on_parcel_sent(&parcel)?;
        }
    }

    // Simulate the server's response arriving on the push channel.
    let response = r#"{"message_id":"srv-1","t12":[{"topic":"news","status":1}]}"#;
    office.on_inbound_parcel(decode_parcel(response)?)?;
    if let Some(update) = topic_updates.recv().await {
        info!(%update, "topic status received");
    }

    Ok(())
}
