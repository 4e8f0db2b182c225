//! Encoding of outbound parcels.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use types::fields;
use types::{MessageType, OutboundParcel, Stamp, StampedParcel};

/// Encodes outbound parcels into the multiplexed wire format.
///
/// Messages are grouped under one `t<N>` key per distinct type, in the order
/// the types are first encountered. A `types` index array lists the keys
/// present. Types in the singleton set serialize a lone instance as a bare
/// object instead of a one-element array; everything else is always an
/// array, even for a single message. The asymmetry is part of the wire
/// format and must not be "fixed".
#[derive(Debug, Clone)]
pub struct ParcelEncoder {
    singleton_types: BTreeSet<MessageType>,
}

impl Default for ParcelEncoder {
    fn default() -> Self {
        let mut singleton_types = BTreeSet::new();
        singleton_types.insert(MessageType::REGISTRATION);
        Self { singleton_types }
    }
}

impl ParcelEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message type that serializes a single instance as a bare object.
    pub fn with_singleton(mut self, message_type: MessageType) -> Self {
        self.singleton_types.insert(message_type);
        self
    }

    /// Encode an unstamped parcel to a JSON string.
    pub fn encode(&self, parcel: &OutboundParcel) -> String {
        self.encode_value(parcel, None).to_string()
    }

    /// Encode a stamped parcel to a JSON string.
    pub fn encode_stamped(&self, stamped: &StampedParcel) -> String {
        self.encode_value(&stamped.parcel, Some(&stamped.stamp))
            .to_string()
    }

    /// Encode a parcel, and optionally a stamp, into a JSON value.
    ///
    /// Panics if a stamp field collides with the `types` key or a `t<N>` key;
    /// that is a programmer error in the stamp provider, not a runtime
    /// condition.
    pub fn encode_value(&self, parcel: &OutboundParcel, stamp: Option<&Stamp>) -> Value {
        let mut envelope = Map::new();
        let mut type_keys = Vec::new();

        for message in &parcel.messages {
            let key = message.message_type.wire_key();
            let slot = envelope.entry(key.clone()).or_insert_with(|| {
                type_keys.push(key);
                Value::Array(Vec::new())
            });
            if let Value::Array(items) = slot {
                items.push(Value::Object(message.payload.clone()));
            }
        }

        for message_type in &self.singleton_types {
            if let Some(slot) = envelope.get_mut(&message_type.wire_key()) {
                if let Value::Array(items) = slot {
                    if items.len() == 1 {
                        let single = items.remove(0);
                        *slot = single;
                    }
                }
            }
        }

        envelope.insert(
            fields::TYPES.to_owned(),
            Value::Array(type_keys.into_iter().map(Value::String).collect()),
        );

        if let Some(stamp) = stamp {
            for (key, value) in stamp {
                assert!(
                    !envelope.contains_key(key),
                    "stamp field `{key}` collides with an envelope key"
                );
                envelope.insert(key.clone(), value.clone());
            }
        }

        Value::Object(envelope)
    }
}
