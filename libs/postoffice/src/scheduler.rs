use std::fmt;
use std::time::Duration;

/// Identifier of a task known to the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task-scheduling backend consumed by the coordinator.
///
/// The transport core never runs the sender task itself; signaling a flush
/// means calling [`schedule_now`](TaskScheduler::schedule_now) for the
/// configured sender task id. De-duplicating repeated signals before the
/// task runs is the scheduler's responsibility, not re-implemented here.
pub trait TaskScheduler: Send + Sync {
    /// Run the task as soon as possible.
    fn schedule_now(&self, task: &TaskId);

    /// Run the task periodically at the given interval.
    fn schedule_periodic(&self, task: &TaskId, interval: Duration);

    /// Cancel a previously scheduled task. No-op if unknown.
    fn cancel(&self, task: &TaskId);
}
