//! Turns tracker snapshots into a banner and short-lived toasts.
//!
//! The presenter owns no unread state of its own: everything it shows is a
//! function of the last two snapshots it observed plus toast expiry timers.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::{
    domain::{message::ConversationId, status::UnreadSnapshot},
    infra::config::NotificationConfig,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub conversation_id: ConversationId,
    pub new_messages: u32,
    pub text: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub total: u32,
    pub text: String,
    pub stale: bool,
}

#[derive(Debug)]
pub struct NotificationPresenter {
    toast_ttl: Duration,
    max_toasts: usize,
    last: Option<UnreadSnapshot>,
    toasts: VecDeque<Toast>,
}

impl NotificationPresenter {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            toast_ttl: Duration::from_millis(config.toast_ttl_ms),
            max_toasts: config.max_toasts.max(1),
            last: None,
            toasts: VecDeque::new(),
        }
    }

    /// Feeds the next snapshot and returns the toasts it raised.
    ///
    /// The first ready snapshot only sets the baseline. Conversations whose
    /// count dropped, or that left the snapshot, lose their toasts.
    pub fn observe(&mut self, snapshot: &UnreadSnapshot, now: Instant) -> Vec<Toast> {
        self.expire(now);

        if !snapshot.ready {
            return Vec::new();
        }

        let Some(previous) = self.last.replace(snapshot.clone()) else {
            return Vec::new();
        };

        let mut raised = Vec::new();
        for (conversation_id, count) in &snapshot.counts {
            let before = previous.count(conversation_id);
            if *count > before {
                raised.push(self.toast_for(conversation_id, count - before, now));
            } else if *count < before {
                self.toasts
                    .retain(|toast| &toast.conversation_id != conversation_id);
            }
        }
        self.toasts
            .retain(|toast| snapshot.counts.contains_key(&toast.conversation_id));

        for toast in &raised {
            self.toasts
                .retain(|existing| existing.conversation_id != toast.conversation_id);
            self.toasts.push_back(toast.clone());
        }
        while self.toasts.len() > self.max_toasts {
            self.toasts.pop_front();
        }

        raised
    }

    pub fn banner(&self) -> Option<Banner> {
        let snapshot = self.last.as_ref()?;
        if snapshot.total == 0 {
            return None;
        }

        Some(Banner {
            total: snapshot.total,
            text: format!(
                "You have {} unread {}",
                snapshot.total,
                plural(snapshot.total, "message", "messages")
            ),
            stale: snapshot.feed.is_stale(),
        })
    }

    pub fn visible_toasts(&mut self, now: Instant) -> impl Iterator<Item = &Toast> {
        self.expire(now);
        self.toasts.iter()
    }

    fn expire(&mut self, now: Instant) {
        self.toasts.retain(|toast| toast.expires_at > now);
    }

    fn toast_for(&self, conversation_id: &ConversationId, new_messages: u32, now: Instant) -> Toast {
        Toast {
            conversation_id: conversation_id.clone(),
            new_messages,
            text: format!(
                "{new_messages} new {} in conversation {conversation_id}",
                plural(new_messages, "message", "messages")
            ),
            expires_at: now + self.toast_ttl,
        }
    }
}

fn plural<'a>(count: u32, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 {
        one
    } else {
        many
    }
}
