//! Shared data model for the message transport core
//!
//! This crate defines the vocabulary every other transport crate speaks:
//! message types and send priorities, raw inbound messages as produced by the
//! envelope codec, the [`OutboundMessage`] preparation seam, and the parcel
//! types that group messages for transmission.
//!
//! The central contract is the split between [`OutboundMessage`] and
//! [`PreparedMessage`]: a message only becomes a `PreparedMessage` after its
//! asynchronous preparation step has completed, and the store and codec only
//! ever accept `PreparedMessage` values. Encoding an unprepared message is
//! therefore unrepresentable rather than merely forbidden.

pub mod fields;
pub mod ident;
pub mod message;
pub mod parcel;

pub use ident::{generate_id, now_millis};
pub use message::{
    MessageType, OutboundMessage, PreparedMessage, RawInboundMessage, SendPriority,
};
pub use parcel::{InboundParcel, OutboundParcel, Stamp, StampedParcel};
