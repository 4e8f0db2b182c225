//! Decoding of inbound parcels.

use serde_json::{Map, Value};
use tracing::warn;

use types::fields;
use types::{InboundParcel, MessageType, RawInboundMessage};

use crate::error::ParcelParseError;

/// Top-level keys that are part of the envelope itself rather than message
/// type keys. They are skipped during decoding.
const KNOWN_ENVELOPE_KEYS: &[&str] = &[fields::TYPES, fields::COURIER];

/// Decode a JSON document into an [`InboundParcel`].
///
/// Syntactic JSON errors are reported as [`ParcelParseError::InvalidFormat`].
pub fn decode_parcel(json: &str) -> Result<InboundParcel, ParcelParseError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|err| ParcelParseError::invalid_format(format!("malformed JSON: {err}")))?;
    decode_parcel_value(value)
}

/// Decode an already-parsed JSON value into an [`InboundParcel`].
///
/// The top level must be an object with a non-blank `message_id` field and
/// only `t<N>` message keys (plus the known envelope keys) beside it. The
/// parcel's messages are emitted in source key order, then array order, and
/// every message payload has the parcel id merged in as `message_id`.
pub fn decode_parcel_value(value: Value) -> Result<InboundParcel, ParcelParseError> {
    let envelope = match value {
        Value::Object(envelope) => envelope,
        other => {
            return Err(ParcelParseError::invalid_format(format!(
                "expected a top-level object, got {}",
                json_kind(&other)
            )))
        }
    };

    let parcel_id = match envelope.get(fields::MESSAGE_ID) {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::String(_)) | None => return Err(ParcelParseError::MissingEnvelopeId),
        Some(other) => {
            return Err(ParcelParseError::invalid_format(format!(
                "`{}` must be a string, got {}",
                fields::MESSAGE_ID,
                json_kind(other)
            )))
        }
    };

    let mut messages = Vec::new();
    for (key, value) in envelope {
        if key == fields::MESSAGE_ID || KNOWN_ENVELOPE_KEYS.contains(&key.as_str()) {
            continue;
        }

        let message_type = MessageType::from_wire_key(&key).ok_or_else(|| {
            ParcelParseError::invalid_format(format!("unexpected envelope key `{key}`"))
        })?;

        match value {
            Value::Object(payload) => {
                messages.push(raw_message(&parcel_id, message_type, payload));
            }
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(payload) => {
                            messages.push(raw_message(&parcel_id, message_type, payload));
                        }
                        other => warn!(
                            %message_type,
                            kind = json_kind(&other),
                            "skipping non-object element in parcel message array"
                        ),
                    }
                }
            }
            other => warn!(
                %message_type,
                kind = json_kind(&other),
                "skipping message value that is neither object nor array"
            ),
        }
    }

    Ok(InboundParcel {
        parcel_id,
        messages,
    })
}

/// Merge the parcel id into the payload and wrap it up as a raw message.
fn raw_message(
    parcel_id: &str,
    message_type: MessageType,
    mut payload: Map<String, Value>,
) -> RawInboundMessage {
    if payload.contains_key(fields::MESSAGE_ID) {
        warn!(
            %message_type,
            parcel_id,
            "inbound message already carries a `message_id` field, replacing it with the parcel id"
        );
    }
    payload.insert(
        fields::MESSAGE_ID.to_owned(),
        Value::String(parcel_id.to_owned()),
    );
    RawInboundMessage {
        message_id: parcel_id.to_owned(),
        message_type,
        payload: Value::Object(payload),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
