//! Well-known envelope field names shared by the codec and the stamper.

/// Envelope-level parcel identity, also merged into every inbound message.
pub const MESSAGE_ID: &str = "message_id";

/// Index of `t<N>` keys present in an encoded parcel.
pub const TYPES: &str = "types";

/// Timestamp carried by every outbound message payload, in epoch milliseconds.
pub const TIME: &str = "time";

/// Transport identifier some servers attach to inbound envelopes.
pub const COURIER: &str = "courier";
