//! Post office - the message transport coordinator
//!
//! ## Purpose
//! Public entry point of the transport core. Accepts outbound messages,
//! persists them through the message store, decides when to trigger the
//! external sender task based on send priority, withholds traffic until
//! registration has completed, and fans inbound parcels out to type-routed
//! subscribers.
//!
//! ## Architecture
//! ```text
//! callers ──► PostOffice handle ──► coordinator task ──► TaskScheduler
//!                    ▲                │  (store, gate,        │
//!                    │                │   policy, stamper)    ▼
//!              subscribers ◄──────────┘                sender task (external)
//! ```
//!
//! All mutable state (store, registration gate, priority timers, subscriber
//! list) lives inside a single spawned coordinator task; the clonable
//! [`PostOffice`] handle communicates with it over a command channel, so no
//! locks guard queue state. The external sender runs on its own context and
//! reaches back through the handle (`collect_parcels` / `on_parcel_sent`).
//!
//! ## Error containment
//! A single bad message must never stop the pipeline: subscriber failures,
//! per-message parse failures and stamp failures are logged and contained.
//! Only preparation failures surface to the `send_message` caller, and only
//! parcel-level decode failures discard inbound data.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod post_office;
pub mod registration;
pub mod scheduler;
pub mod stamper;
pub mod test_utils;

pub use config::PostConfig;
pub use dispatch::{JsonMessageParser, MessageParser};
pub use error::{MessageParseError, SendError};
pub use policy::{PolicyAction, SendPriorityPolicy};
pub use post_office::{PostOffice, SendOptions};
pub use registration::RegistrationGate;
pub use scheduler::{TaskId, TaskScheduler};
pub use stamper::{ParcelStamper, StampProvider, StaticStampProvider};
