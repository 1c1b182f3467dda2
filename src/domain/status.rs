use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::domain::{message::ConversationId, unread_index::UnreadIndex};

/// Health of the live insert feed as seen by one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    Idle,
    Live,
    Reconnecting { attempt: u32 },
    Stopped,
}

impl FeedHealth {
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Idle => "FEED_IDLE",
            Self::Live => "FEED_LIVE",
            Self::Reconnecting { .. } => "FEED_RECONNECTING",
            Self::Stopped => "FEED_STOPPED",
        }
    }

    /// Counts are best-effort while the feed is not delivering.
    pub fn is_stale(self) -> bool {
        !matches!(self, Self::Live)
    }
}

/// Read-only view of a tracker published after every applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadSnapshot {
    pub counts: BTreeMap<ConversationId, u32>,
    pub total: u32,
    pub ready: bool,
    pub feed: FeedHealth,
    pub updated_at_unix_ms: u128,
}

impl Default for UnreadSnapshot {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
            total: 0,
            ready: false,
            feed: FeedHealth::Idle,
            updated_at_unix_ms: now_unix_ms(),
        }
    }
}

impl UnreadSnapshot {
    pub fn capture(index: &UnreadIndex, ready: bool, feed: FeedHealth) -> Self {
        Self {
            counts: index.counts().clone(),
            total: index.total(),
            ready,
            feed,
            updated_at_unix_ms: now_unix_ms(),
        }
    }

    pub fn count(&self, conversation_id: &ConversationId) -> u32 {
        self.counts.get(conversation_id).copied().unwrap_or(0)
    }
}

pub fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
