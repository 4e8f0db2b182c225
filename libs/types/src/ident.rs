use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Generate a random lowercase hex identifier of the given length.
pub fn generate_id(length: usize) -> String {
    let mut id = String::with_capacity(length + 32);
    while id.len() < length {
        id.push_str(&Uuid::new_v4().simple().to_string());
    }
    id.truncate(length);
    id
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
