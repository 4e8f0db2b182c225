//! Send priority policy - decides when an arrival should trigger a flush.

use std::time::Duration;

use types::SendPriority;

/// What the coordinator should do in response to an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Signal the scheduler immediately.
    FlushNow,
    /// Start the one-shot SOON timer with the given delay.
    StartSoonTimer(Duration),
    /// Check whether enough buffered traffic has accumulated for a full
    /// parcel, and flush if so.
    CheckBufferedFlush,
    /// Nothing to do; the entry waits for another flush cause.
    Wait,
}

/// Per-priority-class flush state machine.
///
/// The only state it carries is whether a SOON timer is currently pending:
/// the flush deadline is anchored to the first SOON arrival after a quiet
/// period, and arrivals while the timer runs neither reset nor extend it.
#[derive(Debug)]
pub struct SendPriorityPolicy {
    buffer_time_soon: Duration,
    soon_timer_pending: bool,
}

impl SendPriorityPolicy {
    pub fn new(buffer_time_soon: Duration) -> Self {
        Self {
            buffer_time_soon,
            soon_timer_pending: false,
        }
    }

    /// React to a newly eligible entry of the given priority.
    pub fn on_arrival(&mut self, priority: SendPriority) -> PolicyAction {
        match priority {
            SendPriority::Immediate => PolicyAction::FlushNow,
            SendPriority::Soon => {
                if self.soon_timer_pending {
                    PolicyAction::Wait
                } else {
                    self.soon_timer_pending = true;
                    PolicyAction::StartSoonTimer(self.buffer_time_soon)
                }
            }
            SendPriority::Whenever | SendPriority::Buffer => PolicyAction::CheckBufferedFlush,
        }
    }

    /// React to the SOON timer firing. The timer is consumed; a later SOON
    /// arrival starts a fresh one.
    pub fn on_soon_timer_elapsed(&mut self) -> PolicyAction {
        self.soon_timer_pending = false;
        PolicyAction::FlushNow
    }

    pub fn soon_timer_pending(&self) -> bool {
        self.soon_timer_pending
    }
}
