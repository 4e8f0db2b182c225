//! Parcel stamper - attaches envelope-level metadata to outbound parcels.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use types::{fields, ident, OutboundParcel, Stamp, StampedParcel};

/// Supplies the embedder-specific stamp fields (instance id, device id,
/// credentials and the like) for an outbound parcel.
pub trait StampProvider: Send + Sync {
    fn stamp(&self, parcel: &OutboundParcel) -> anyhow::Result<Stamp>;
}

/// A fixed set of stamp fields, computed once at construction.
#[derive(Debug, Default)]
pub struct StaticStampProvider {
    fields: Stamp,
}

impl StaticStampProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl StampProvider for StaticStampProvider {
    fn stamp(&self, _parcel: &OutboundParcel) -> anyhow::Result<Stamp> {
        Ok(self.fields.clone())
    }
}

/// Wraps outbound parcels with their stamp just before they are handed to
/// the sender.
///
/// Stamp computation is best-effort: a failing provider degrades to an
/// empty stamp and a warning, it never blocks the send. The stamper itself
/// always contributes the parcel identity and the send time.
pub struct ParcelStamper {
    provider: Arc<dyn StampProvider>,
}

impl ParcelStamper {
    pub fn new(provider: Arc<dyn StampProvider>) -> Self {
        Self { provider }
    }

    pub fn stamp_parcel(&self, parcel: OutboundParcel) -> StampedParcel {
        let mut stamp = match self.provider.stamp(&parcel) {
            Ok(stamp) => stamp,
            Err(err) => {
                warn!(
                    parcel_id = %parcel.parcel_id,
                    %err,
                    "stamp computation failed, sending parcel with an empty stamp"
                );
                Stamp::new()
            }
        };

        stamp.insert(
            fields::MESSAGE_ID.to_owned(),
            Value::String(parcel.parcel_id.clone()),
        );
        stamp.insert(fields::TIME.to_owned(), Value::from(ident::now_millis()));

        StampedParcel { parcel, stamp }
    }
}
