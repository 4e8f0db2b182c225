//! Envelope codec - encoding and decoding of the multiplexed wire format
//!
//! A parcel is a single JSON object carrying many typed messages at once.
//! Each message type present contributes one top-level key of the form
//! `t<N>` whose value is either a single message object or an array of them:
//!
//! ```json
//! {
//!     "message_id": "pq81hx02m4ln7a#2",
//!     "t25": { "key": "value" },
//!     "t35": [ { "key": "value" }, { "key": "value" } ]
//! }
//! ```
//!
//! Decoding ([`parser`]) rejects whole parcels, never individual messages: a
//! missing `message_id` or any unrecognized top-level key fails the parcel
//! with a typed [`ParcelParseError`]. Encoding ([`builder`]) additionally
//! emits a `types` index array and, for stamped parcels, the stamp fields as
//! top-level siblings of the type keys.

pub mod builder;
pub mod error;
pub mod parser;

pub use builder::ParcelEncoder;
pub use error::ParcelParseError;
pub use parser::{decode_parcel, decode_parcel_value};
