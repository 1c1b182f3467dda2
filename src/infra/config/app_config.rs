use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub logging: LogConfig,
    pub tracker: TrackerConfig,
    pub feed: FeedConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Upper bound for every snapshot query and read-flag write.
    pub store_timeout_ms: u64,
    pub command_queue_capacity: usize,
    /// Re-query a conversation's count when inserts landed during its mark-read write.
    pub reconcile_after_mark_read: bool,
    /// Reload the snapshot after the live feed recovers from a gap.
    pub resync_on_reconnect: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
            command_queue_capacity: 256,
            reconcile_after_mark_read: true,
            resync_on_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter_ms: u64,
    pub session_queue_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 250,
            backoff_max_ms: 30_000,
            backoff_jitter_ms: 250,
            session_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationConfig {
    pub toast_ttl_ms: u64,
    pub max_toasts: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            toast_ttl_ms: 5_000,
            max_toasts: 3,
        }
    }
}
