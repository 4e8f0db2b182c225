//! Message store - durable, ordered record of outbound messages
//!
//! The store keeps every outbound message that is awaiting transmission, in
//! insertion order, partitioned by a persistence flag: persisted entries are
//! written through to a [`DurableBackend`] and survive process restarts,
//! transient entries live only in memory but follow the same API.
//!
//! The store is deliberately not thread safe. It is owned by the post office
//! coordinator and only ever touched from that single execution context;
//! other contexts reach it through the coordinator's message-passing API.
//!
//! Absence is never an error here: removing a missing entry is a no-op and
//! eligibility queries return empty results rather than failing.

pub mod backend;
pub mod store;

pub use backend::{DurableBackend, MemoryBackend};
pub use store::{MessageStore, QueuedEntry};
