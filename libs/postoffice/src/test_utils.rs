//! Shared helpers for coordinator tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use types::{MessageType, OutboundMessage};

use crate::scheduler::{TaskId, TaskScheduler};
use crate::stamper::StampProvider;

/// Records every scheduling call instead of running anything.
#[derive(Default)]
pub struct RecordingScheduler {
    signals: Mutex<Vec<TaskId>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many immediate-run signals were issued for the given task.
    pub fn signal_count(&self, task: &TaskId) -> usize {
        self.signals.lock().iter().filter(|t| *t == task).count()
    }

    pub fn total_signals(&self) -> usize {
        self.signals.lock().len()
    }
}

impl TaskScheduler for RecordingScheduler {
    fn schedule_now(&self, task: &TaskId) {
        self.signals.lock().push(task.clone());
    }

    fn schedule_periodic(&self, _task: &TaskId, _interval: Duration) {}

    fn cancel(&self, _task: &TaskId) {}
}

/// A stamp provider that always fails.
pub struct FailingStampProvider;

impl StampProvider for FailingStampProvider {
    fn stamp(&self, _parcel: &types::OutboundParcel) -> anyhow::Result<types::Stamp> {
        anyhow::bail!("stamp source unavailable")
    }
}

/// A scriptable outbound message with a fixed payload and an optional
/// preparation failure.
pub struct TestMessage {
    message_id: String,
    message_type: MessageType,
    payload: Map<String, Value>,
    fail_preparation: bool,
}

impl TestMessage {
    pub fn new(message_id: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            message_id: message_id.into(),
            message_type,
            payload: Map::new(),
            fail_preparation: false,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_preparation = true;
        self
    }
}

#[async_trait]
impl OutboundMessage for TestMessage {
    fn message_type(&self) -> MessageType {
        self.message_type
    }

    fn message_id(&self) -> &str {
        &self.message_id
    }

    async fn prepare(&self) -> anyhow::Result<Map<String, Value>> {
        if self.fail_preparation {
            anyhow::bail!("preparation step failed");
        }
        Ok(self.payload.clone())
    }
}

/// Let the coordinator task drain its queued commands without advancing
/// virtual time.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
