use serde_json::{Map, Value};

use crate::ident;
use crate::message::{PreparedMessage, RawInboundMessage};

/// Envelope-level metadata merged into an outbound parcel at encode time.
///
/// Stamp fields become top-level siblings of the `t<N>` keys.
pub type Stamp = Map<String, Value>;

const PARCEL_ID_LENGTH: usize = 16;

/// An inbound envelope: one or more typed messages sharing a parcel id.
#[derive(Debug, Clone)]
pub struct InboundParcel {
    pub parcel_id: String,
    pub messages: Vec<RawInboundMessage>,
}

/// A group of prepared outbound messages, the unit of wire transmission.
#[derive(Debug, Clone)]
pub struct OutboundParcel {
    pub parcel_id: String,
    pub messages: Vec<PreparedMessage>,
}

impl OutboundParcel {
    /// Build a parcel around the given messages with a freshly generated id.
    pub fn new(messages: Vec<PreparedMessage>) -> Self {
        Self {
            parcel_id: Self::generate_parcel_id(&messages),
            messages,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Create a parcel id of the form `{random}#{count:x}`.
    ///
    /// The message count is embedded in the id so that it can still be
    /// recovered when an ACK or error arrives after some of the parcel's
    /// messages have already been removed from the store (e.g. expired).
    pub fn generate_parcel_id(messages: &[PreparedMessage]) -> String {
        let count = format!("{:x}", messages.len());
        let random_length = PARCEL_ID_LENGTH.saturating_sub(count.len() + 1);
        format!("{}#{}", ident::generate_id(random_length), count)
    }

    /// Extract the message count embedded in a parcel id, if present.
    pub fn message_count_from_id(parcel_id: &str) -> Option<usize> {
        let (_, count) = parcel_id.split_once('#')?;
        usize::from_str_radix(count, 16).ok()
    }
}

/// An outbound parcel together with its envelope stamp.
#[derive(Debug, Clone)]
pub struct StampedParcel {
    pub parcel: OutboundParcel,
    pub stamp: Stamp,
}

impl StampedParcel {
    pub fn parcel_id(&self) -> &str {
        &self.parcel.parcel_id
    }

    /// Ids of the messages contained in this parcel, in parcel order.
    pub fn message_ids(&self) -> Vec<String> {
        self.parcel
            .messages
            .iter()
            .map(|message| message.message_id.clone())
            .collect()
    }
}
