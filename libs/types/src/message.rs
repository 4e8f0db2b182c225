use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fields;
use crate::ident;

/// Integer discriminator selecting a message's schema and routing.
///
/// On the wire a message type appears as the envelope key `t<N>`, e.g. `t10`
/// for registration messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageType(pub u32);

impl MessageType {
    pub const DELIVERY: MessageType = MessageType(1);
    pub const REGISTRATION: MessageType = MessageType(10);
    pub const TOPIC_STATUS: MessageType = MessageType(12);

    /// The envelope key for this type, e.g. `t10`.
    pub fn wire_key(&self) -> String {
        format!("t{}", self.0)
    }

    /// Parse an envelope key of the form `t<positive-integer>`.
    ///
    /// Returns `None` for anything else, including `t0`, a bare `t` and keys
    /// with non-digit characters after the prefix.
    pub fn from_wire_key(key: &str) -> Option<MessageType> {
        let digits = key.strip_prefix('t')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match digits.parse::<u32>() {
            Ok(0) | Err(_) => None,
            Ok(value) => Some(MessageType(value)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Priority class controlling when an outbound flush is triggered.
///
/// The ordering is significant and total:
/// `Whenever < Buffer < Soon < Immediate`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SendPriority {
    Whenever,
    Buffer,
    Soon,
    Immediate,
}

/// An inbound message as produced by decoding a parcel.
///
/// The payload is an untyped JSON tree; subscribers that want a typed view
/// attach a parser at subscription time. Instances are ephemeral and never
/// persisted.
#[derive(Debug, Clone)]
pub struct RawInboundMessage {
    /// Identity of this message, shared with the parcel it arrived in.
    pub message_id: String,
    pub message_type: MessageType,
    pub payload: Value,
}

impl fmt::Display for RawInboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RawInboundMessage[id={} type={}]",
            self.message_id, self.message_type
        )
    }
}

/// An outbound message before preparation.
///
/// `prepare` is an asynchronous, possibly side-effecting enrichment step that
/// runs exactly once per send and yields the final JSON payload. A message is
/// not visible to the store, and cannot be encoded, until preparation has
/// completed; a failed preparation means the message is never stored.
#[async_trait]
pub trait OutboundMessage: Send + Sync {
    fn message_type(&self) -> MessageType;

    fn message_id(&self) -> &str;

    /// Run the enrichment step and produce the payload object.
    async fn prepare(&self) -> anyhow::Result<Map<String, Value>>;
}

/// An outbound message whose preparation step has completed.
///
/// This is the only form the message store and envelope codec accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedMessage {
    pub message_id: String,
    pub message_type: MessageType,
    pub payload: Map<String, Value>,
    /// Creation time in epoch milliseconds, also present in the payload as
    /// the `time` field.
    pub created_at_ms: u64,
}

impl PreparedMessage {
    /// Wrap a prepared payload, stamping the creation time into it.
    pub fn new(message_id: String, message_type: MessageType, payload: Map<String, Value>) -> Self {
        Self::with_created_at(message_id, message_type, payload, ident::now_millis())
    }

    /// Wrap a prepared payload with an explicit creation time (used when
    /// restoring persisted messages).
    pub fn with_created_at(
        message_id: String,
        message_type: MessageType,
        mut payload: Map<String, Value>,
        created_at_ms: u64,
    ) -> Self {
        payload
            .entry(fields::TIME.to_owned())
            .or_insert_with(|| Value::from(created_at_ms));
        Self {
            message_id,
            message_type,
            payload,
            created_at_ms,
        }
    }

    /// Serialized payload size in bytes, used for parcel grouping limits.
    pub fn size(&self) -> usize {
        serde_json::to_string(&self.payload)
            .map(|json| json.len())
            .unwrap_or(0)
    }
}
