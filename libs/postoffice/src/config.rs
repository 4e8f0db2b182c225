//! Coordinator configuration.
//!
//! All knobs have conservative defaults; embedders typically load overrides
//! from a small TOML section:
//!
//! ```toml
//! [post_office]
//! buffer_time_soon_ms = 2000
//! max_parcel_size = 3500
//! default_max_pending_per_type = 50
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Timing and size parameters for the post office coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostConfig {
    /// Delay between the first SOON-priority arrival and the flush it
    /// triggers. Later arrivals inside the window do not extend it.
    pub buffer_time_soon_ms: u64,

    /// Serialized-payload budget per parcel. Buffered entries trigger a
    /// flush once their combined size reaches this value, and collected
    /// parcels are chunked so each stays within it.
    pub max_parcel_size: usize,

    /// Maximum pending messages of one type before new ones are ignored.
    pub default_max_pending_per_type: usize,

    /// How long a stored message is retried before being disposed, unless
    /// the message carries its own expiration.
    pub default_expiration_ms: u64,

    /// Scheduler task id of the external sender task.
    pub sender_task_id: String,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            buffer_time_soon_ms: 2_000,
            max_parcel_size: 3_500,
            default_max_pending_per_type: 50,
            default_expiration_ms: 7 * 24 * 60 * 60 * 1_000,
            sender_task_id: "outbound-sender".to_owned(),
        }
    }
}

impl PostConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn buffer_time_soon(&self) -> Duration {
        Duration::from_millis(self.buffer_time_soon_ms)
    }

    pub fn default_expiration(&self) -> Duration {
        Duration::from_millis(self.default_expiration_ms)
    }
}
