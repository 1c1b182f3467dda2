use serde::Deserialize;

use crate::infra::config::{AppConfig, FeedConfig, LogConfig, NotificationConfig, TrackerConfig};

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub logging: Option<FileLogConfig>,
    pub tracker: Option<FileTrackerConfig>,
    pub feed: Option<FileFeedConfig>,
    pub notifications: Option<FileNotificationConfig>,
}

impl FileConfig {
    pub fn merge_into(self, config: &mut AppConfig) {
        if let Some(logging) = self.logging {
            logging.merge_into(&mut config.logging);
        }

        if let Some(tracker) = self.tracker {
            tracker.merge_into(&mut config.tracker);
        }

        if let Some(feed) = self.feed {
            feed.merge_into(&mut config.feed);
        }

        if let Some(notifications) = self.notifications {
            notifications.merge_into(&mut config.notifications);
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogConfig {
    pub level: Option<String>,
}

impl FileLogConfig {
    fn merge_into(self, config: &mut LogConfig) {
        if let Some(level) = self.level {
            config.level = level;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileTrackerConfig {
    pub store_timeout_ms: Option<u64>,
    pub command_queue_capacity: Option<usize>,
    pub reconcile_after_mark_read: Option<bool>,
    pub resync_on_reconnect: Option<bool>,
}

impl FileTrackerConfig {
    fn merge_into(self, config: &mut TrackerConfig) {
        if let Some(timeout_ms) = self.store_timeout_ms {
            config.store_timeout_ms = timeout_ms;
        }

        if let Some(capacity) = self.command_queue_capacity {
            config.command_queue_capacity = capacity;
        }

        if let Some(reconcile) = self.reconcile_after_mark_read {
            config.reconcile_after_mark_read = reconcile;
        }

        if let Some(resync) = self.resync_on_reconnect {
            config.resync_on_reconnect = resync;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileFeedConfig {
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub backoff_jitter_ms: Option<u64>,
    pub session_queue_capacity: Option<usize>,
}

impl FileFeedConfig {
    fn merge_into(self, config: &mut FeedConfig) {
        if let Some(base_ms) = self.backoff_base_ms {
            config.backoff_base_ms = base_ms;
        }

        if let Some(max_ms) = self.backoff_max_ms {
            config.backoff_max_ms = max_ms;
        }

        if let Some(jitter_ms) = self.backoff_jitter_ms {
            config.backoff_jitter_ms = jitter_ms;
        }

        if let Some(capacity) = self.session_queue_capacity {
            config.session_queue_capacity = capacity;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileNotificationConfig {
    pub toast_ttl_ms: Option<u64>,
    pub max_toasts: Option<usize>,
}

impl FileNotificationConfig {
    fn merge_into(self, config: &mut NotificationConfig) {
        if let Some(ttl_ms) = self.toast_ttl_ms {
            config.toast_ttl_ms = ttl_ms;
        }

        if let Some(max_toasts) = self.max_toasts {
            config.max_toasts = max_toasts;
        }
    }
}
