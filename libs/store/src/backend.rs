use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Abstract durable key-value backend the store persists into.
///
/// The transport core does not implement durability itself; embedders supply
/// a backend over whatever storage they have. Writes become durable once
/// `save` returns. Keys are message ids, values are serialized entries.
pub trait DurableBackend: Send + Sync {
    /// All persisted records, as (key, value) pairs. Order is not meaningful.
    fn entries(&self) -> Vec<(String, String)>;

    fn put(&self, key: &str, value: &str);

    fn remove(&self, key: &str);

    /// Flush pending writes to durable storage.
    fn save(&self) -> anyhow::Result<()>;
}

/// In-memory backend used for transient entries and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, String>>,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of `save` calls observed, for write-through assertions.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.records.lock().get(key).cloned()
    }

    /// Seed a record directly, bypassing the store API (restore tests).
    pub fn seed(&self, key: &str, value: &str) {
        self.records.lock().insert(key.to_owned(), value.to_owned());
    }
}

impl DurableBackend for MemoryBackend {
    fn entries(&self) -> Vec<(String, String)> {
        self.records
            .lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn put(&self, key: &str, value: &str) {
        self.records.lock().insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.records.lock().remove(key);
    }

    fn save(&self) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
