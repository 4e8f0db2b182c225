use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, trace, warn};

use types::{ident, MessageType, PreparedMessage, SendPriority};

use crate::backend::DurableBackend;

/// A stored outbound message together with its queueing options.
///
/// Entries are owned exclusively by the store and mutated only through its
/// API, from the coordinator context.
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub message: PreparedMessage,
    pub priority: SendPriority,
    pub persist_across_restarts: bool,
    pub requires_registration: bool,
    pub created_at_ms: u64,
    /// Per-entry expiration override; the store default applies when `None`.
    pub expire_after: Option<Duration>,
}

impl QueuedEntry {
    fn is_eligible(&self, registered: bool) -> bool {
        registered || !self.requires_registration
    }
}

/// Persisted form of a queued entry. Field names are part of the stored
/// format and must stay stable across releases.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(rename = "id")]
    message_id: String,
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(rename = "priority")]
    priority: SendPriority,
    #[serde(rename = "data")]
    payload: Map<String, Value>,
    #[serde(rename = "time")]
    created_at_ms: u64,
    #[serde(rename = "expire", skip_serializing_if = "Option::is_none", default)]
    expire_after_ms: Option<u64>,
}

/// Durable, insertion-ordered record of outbound messages awaiting
/// transmission, keyed by message id.
pub struct MessageStore {
    backend: Arc<dyn DurableBackend>,
    entries: Vec<QueuedEntry>,
    existing_ids: HashSet<String>,
    count_per_type: HashMap<MessageType, usize>,
    max_pending_per_type: usize,
}

impl MessageStore {
    pub fn new(backend: Arc<dyn DurableBackend>, max_pending_per_type: usize) -> Self {
        Self {
            backend,
            entries: Vec::new(),
            existing_ids: HashSet::new(),
            count_per_type: HashMap::new(),
            max_pending_per_type,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.existing_ids.contains(message_id)
    }

    /// Reload persisted entries from the backend. Should be called once at
    /// startup, before any new messages are stored.
    ///
    /// Records that can no longer be decoded are dropped from the backend.
    /// Returns the highest priority among the restored entries, or `None`
    /// when nothing was restored. Restored entries always require
    /// registration; that is the only kind the store persists.
    pub fn restore(&mut self) -> Option<SendPriority> {
        let mut highest: Option<SendPriority> = None;
        let mut errored_keys = Vec::new();

        for (key, json) in self.backend.entries() {
            let persisted: PersistedEntry = match serde_json::from_str(&json) {
                Ok(persisted) => persisted,
                Err(err) => {
                    warn!(key, %err, "unable to recover persisted outbound message, dropping it");
                    errored_keys.push(key);
                    continue;
                }
            };

            let message = PreparedMessage::with_created_at(
                persisted.message_id,
                persisted.message_type,
                persisted.payload,
                persisted.created_at_ms,
            );

            highest = Some(match highest {
                Some(current) if current >= persisted.priority => current,
                _ => persisted.priority,
            });

            self.existing_ids.insert(message.message_id.clone());
            *self.count_per_type.entry(message.message_type).or_insert(0) += 1;
            self.entries.push(QueuedEntry {
                message,
                priority: persisted.priority,
                persist_across_restarts: true,
                requires_registration: true,
                created_at_ms: persisted.created_at_ms,
                expire_after: persisted.expire_after_ms.map(Duration::from_millis),
            });
        }

        if !errored_keys.is_empty() {
            for key in &errored_keys {
                self.backend.remove(key);
            }
            self.flush_backend();
        }

        if !self.entries.is_empty() {
            debug!(
                count = self.entries.len(),
                highest_priority = ?highest,
                "restored pending outbound messages"
            );
        }

        highest
    }

    /// Insert a new entry, writing it through to the backend when `persist`
    /// is set.
    ///
    /// Returns `None` when the message is ignored: either its id is already
    /// present, or too many messages of its type are pending. Callers are
    /// responsible for not double-sending; duplicate content with distinct
    /// ids is accepted.
    pub fn store(
        &mut self,
        message: PreparedMessage,
        priority: SendPriority,
        persist: bool,
        requires_registration: bool,
        expire_after: Option<Duration>,
    ) -> Option<&QueuedEntry> {
        if self.existing_ids.contains(&message.message_id) {
            error!(
                message_id = %message.message_id,
                message_type = %message.message_type,
                "attempted to store outbound message with duplicate message id"
            );
            return None;
        }

        let pending = self.count_per_type.get(&message.message_type).copied().unwrap_or(0);
        if pending >= self.max_pending_per_type {
            warn!(
                message_type = %message.message_type,
                pending,
                "ignoring outbound message, too many messages of this type are already pending"
            );
            return None;
        }

        let entry = QueuedEntry {
            created_at_ms: message.created_at_ms,
            priority,
            persist_across_restarts: persist,
            requires_registration,
            expire_after,
            message,
        };

        self.existing_ids.insert(entry.message.message_id.clone());
        *self.count_per_type.entry(entry.message.message_type).or_insert(0) += 1;

        if persist {
            self.persist_entry(&entry);
        }

        self.entries.push(entry);
        self.entries.last()
    }

    /// All stored entries in insertion order, regardless of eligibility.
    pub fn entries(&self) -> &[QueuedEntry] {
        &self.entries
    }

    /// Entries not gated by registration, in insertion order.
    pub fn eligible_entries(&self, registered: bool) -> Vec<&QueuedEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.is_eligible(registered))
            .collect()
    }

    /// Number of stored entries that require registration.
    pub fn gated_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.requires_registration)
            .count()
    }

    /// Delete an entry on confirmed send. No-op if the id is absent.
    pub fn remove(&mut self, message_id: &str) {
        if !self.existing_ids.remove(message_id) {
            return;
        }

        let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.message.message_id == message_id)
        else {
            return;
        };

        let entry = self.entries.remove(index);
        if let Some(count) = self.count_per_type.get_mut(&entry.message.message_type) {
            *count = count.saturating_sub(1);
        }
        if entry.persist_across_restarts {
            self.backend.remove(message_id);
            self.flush_backend();
        }
    }

    /// Drop entries older than their expiration time. Returns how many were
    /// disposed.
    pub fn dispose_expired(&mut self, default_expiration: Duration) -> usize {
        let now = ident::now_millis();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                let limit = entry.expire_after.unwrap_or(default_expiration);
                now.saturating_sub(entry.created_at_ms) >= limit.as_millis() as u64
            })
            .map(|entry| {
                trace!(
                    message_id = %entry.message.message_id,
                    message_type = %entry.message.message_type,
                    "outbound message has expired, disposing it"
                );
                entry.message.message_id.clone()
            })
            .collect();

        for message_id in &expired {
            self.remove(message_id);
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "expired outbound messages were disposed");
        }
        expired.len()
    }

    fn persist_entry(&self, entry: &QueuedEntry) {
        let persisted = PersistedEntry {
            message_id: entry.message.message_id.clone(),
            message_type: entry.message.message_type,
            priority: entry.priority,
            payload: entry.message.payload.clone(),
            created_at_ms: entry.created_at_ms,
            expire_after_ms: entry.expire_after.map(|d| d.as_millis() as u64),
        };
        match serde_json::to_string(&persisted) {
            Ok(json) => {
                self.backend.put(&entry.message.message_id, &json);
                self.flush_backend();
            }
            Err(err) => error!(
                message_id = %entry.message.message_id,
                %err,
                "failed to serialize outbound message for persistence"
            ),
        }
    }

    fn flush_backend(&self) {
        if let Err(err) = self.backend.save() {
            error!(%err, "message store backend save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn prepared(id: &str, message_type: MessageType) -> PreparedMessage {
        PreparedMessage::new(id.to_owned(), message_type, Map::new())
    }

    fn store_with_backend() -> (MessageStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (MessageStore::new(backend.clone(), 50), backend)
    }

    #[test]
    fn stores_entries_in_insertion_order() {
        let (mut store, _) = store_with_backend();
        store.store(prepared("a", MessageType(1)), SendPriority::Soon, false, true, None);
        store.store(prepared("b", MessageType(2)), SendPriority::Whenever, false, true, None);
        store.store(prepared("c", MessageType(1)), SendPriority::Immediate, false, false, None);

        let ids: Vec<_> = store
            .entries()
            .iter()
            .map(|entry| entry.message.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let (mut store, _) = store_with_backend();
        assert!(store
            .store(prepared("a", MessageType(1)), SendPriority::Soon, false, true, None)
            .is_some());
        assert!(store
            .store(prepared("a", MessageType(1)), SendPriority::Soon, false, true, None)
            .is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn per_type_pending_limit_is_enforced() {
        let backend = Arc::new(MemoryBackend::new());
        let mut store = MessageStore::new(backend, 2);
        assert!(store
            .store(prepared("a", MessageType(1)), SendPriority::Soon, false, true, None)
            .is_some());
        assert!(store
            .store(prepared("b", MessageType(1)), SendPriority::Soon, false, true, None)
            .is_some());
        assert!(store
            .store(prepared("c", MessageType(1)), SendPriority::Soon, false, true, None)
            .is_none());
        // A different type is unaffected.
        assert!(store
            .store(prepared("d", MessageType(2)), SendPriority::Soon, false, true, None)
            .is_some());

        // Removal frees the slot again.
        store.remove("a");
        assert!(store
            .store(prepared("e", MessageType(1)), SendPriority::Soon, false, true, None)
            .is_some());
    }

    #[test]
    fn eligibility_respects_registration_gate() {
        let (mut store, _) = store_with_backend();
        store.store(prepared("gated", MessageType(1)), SendPriority::Soon, false, true, None);
        store.store(prepared("free", MessageType(2)), SendPriority::Soon, false, false, None);

        let before: Vec<_> = store
            .eligible_entries(false)
            .iter()
            .map(|entry| entry.message.message_id.as_str())
            .collect();
        assert_eq!(before, vec!["free"]);

        let after: Vec<_> = store
            .eligible_entries(true)
            .iter()
            .map(|entry| entry.message.message_id.as_str())
            .collect();
        assert_eq!(after, vec!["gated", "free"]);
        assert_eq!(store.gated_count(), 1);
    }

    #[test]
    fn removal_is_idempotent() {
        let (mut store, backend) = store_with_backend();
        store.store(prepared("a", MessageType(1)), SendPriority::Soon, true, true, None);
        assert_eq!(backend.len(), 1);

        store.remove("a");
        assert!(store.is_empty());
        assert!(backend.is_empty());

        // Absent ids are not an error.
        store.remove("a");
        store.remove("never-stored");
    }

    #[test]
    fn persisted_entries_survive_a_restart() {
        let (mut store, backend) = store_with_backend();
        store.store(prepared("keep", MessageType(1)), SendPriority::Immediate, true, true, None);
        store.store(prepared("drop", MessageType(1)), SendPriority::Soon, false, true, None);
        assert!(backend.save_count() > 0);

        let mut restored = MessageStore::new(backend, 50);
        assert_eq!(restored.restore(), Some(SendPriority::Immediate));
        assert_eq!(restored.len(), 1);
        let entry = &restored.entries()[0];
        assert_eq!(entry.message.message_id, "keep");
        assert!(entry.requires_registration);
        assert!(entry.persist_across_restarts);
    }

    #[test]
    fn restore_drops_undecodable_records() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("bad", "not json at all");
        let mut store = MessageStore::new(backend.clone(), 50);
        assert_eq!(store.restore(), None);
        assert!(store.is_empty());
        assert!(backend.is_empty());
    }

    #[test]
    fn expired_entries_are_disposed() {
        let (mut store, backend) = store_with_backend();
        let old = PreparedMessage::with_created_at(
            "old".to_owned(),
            MessageType(1),
            Map::new(),
            ident::now_millis().saturating_sub(10_000),
        );
        store.store(old, SendPriority::Soon, true, true, None);
        store.store(prepared("fresh", MessageType(1)), SendPriority::Soon, false, true, None);

        let disposed = store.dispose_expired(Duration::from_secs(5));
        assert_eq!(disposed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].message.message_id, "fresh");
        assert!(backend.is_empty());
    }

    #[test]
    fn per_entry_expiration_overrides_the_default() {
        let (mut store, _) = store_with_backend();
        let message = PreparedMessage::with_created_at(
            "short-lived".to_owned(),
            MessageType(1),
            Map::new(),
            ident::now_millis().saturating_sub(2_000),
        );
        store.store(
            message,
            SendPriority::Soon,
            false,
            true,
            Some(Duration::from_secs(1)),
        );

        // Default would keep it, the override expires it.
        assert_eq!(store.dispose_expired(Duration::from_secs(3600)), 1);
        assert!(store.is_empty());
    }
}
