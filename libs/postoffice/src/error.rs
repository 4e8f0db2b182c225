use thiserror::Error;

use types::MessageType;

/// Failures surfaced to `send_message` callers.
#[derive(Debug, Error)]
pub enum SendError {
    /// The message's preparation step failed. The message was never stored
    /// and will not be sent.
    #[error("preparation failed for outbound message {message_type}: {source}")]
    Preparation {
        message_type: MessageType,
        #[source]
        source: anyhow::Error,
    },

    /// The coordinator task has shut down.
    #[error("post office is closed")]
    Closed,
}

/// A single inbound message could not be decoded into its typed form.
///
/// Scoped to one message inside an otherwise valid parcel: the message is
/// skipped and logged, sibling messages are unaffected.
#[derive(Debug, Error)]
#[error("could not parse inbound message of type {message_type}: {source}")]
pub struct MessageParseError {
    pub message_type: MessageType,
    #[source]
    pub source: anyhow::Error,
}

impl MessageParseError {
    pub fn new(message_type: MessageType, source: impl Into<anyhow::Error>) -> Self {
        Self {
            message_type,
            source: source.into(),
        }
    }
}
