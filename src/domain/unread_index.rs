use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::message::{ConversationId, Message, MessageId, SenderRole};

/// Outcome of feeding one inserted message into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Counted,
    OwnMessage,
    AlreadyRead,
    Duplicate,
}

/// Per-viewer map of conversation to unread count, with a cached total.
///
/// Every mutating method keeps `total == sum(counts)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadIndex {
    counts: BTreeMap<ConversationId, u32>,
    total: u32,
    applied: HashSet<MessageId>,
}

impl UnreadIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all counts with a freshly loaded snapshot of unread ids.
    ///
    /// Every id in the snapshot is remembered as applied, so a feed event for
    /// a message the store already counted is ignored when it drains later.
    /// Ids applied earlier in the session stay remembered as well.
    pub fn install(&mut self, unread: BTreeMap<ConversationId, BTreeSet<MessageId>>) {
        let mut counts = BTreeMap::new();
        for (conversation_id, ids) in unread {
            counts.insert(conversation_id, id_count(&ids));
            self.applied.extend(ids);
        }

        self.total = counts
            .values()
            .fold(0u32, |acc, count| acc.saturating_add(*count));
        self.counts = counts;
    }

    pub fn apply_insert(&mut self, message: &Message, viewer_role: SenderRole) -> InsertOutcome {
        if message.sender_role == viewer_role {
            return InsertOutcome::OwnMessage;
        }

        if message.is_read {
            return InsertOutcome::AlreadyRead;
        }

        if !self.applied.insert(message.id.clone()) {
            return InsertOutcome::Duplicate;
        }

        let entry = self
            .counts
            .entry(message.conversation_id.clone())
            .or_insert(0);
        *entry = entry.saturating_add(1);
        self.total = self.total.saturating_add(1);

        InsertOutcome::Counted
    }

    /// Zeroes one conversation and returns the count it held before.
    pub fn reset(&mut self, conversation_id: &ConversationId) -> u32 {
        let Some(count) = self.counts.get_mut(conversation_id) else {
            return 0;
        };

        let prior = *count;
        *count = 0;
        self.total = self.total.saturating_sub(prior);
        prior
    }

    /// Overwrites one conversation with the store's unread ids and remembers them as applied.
    pub fn set_unread(&mut self, conversation_id: &ConversationId, ids: BTreeSet<MessageId>) {
        let count = id_count(&ids);
        self.applied.extend(ids);
        self.set_count(conversation_id, count);
    }

    /// Overwrites one conversation with a count whose message ids are unknown.
    pub fn set_count(&mut self, conversation_id: &ConversationId, count: u32) {
        let prior = self.counts.insert(conversation_id.clone(), count).unwrap_or(0);
        self.total = self.total.saturating_sub(prior).saturating_add(count);
    }

    pub fn get(&self, conversation_id: &ConversationId) -> u32 {
        self.counts.get(conversation_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn counts(&self) -> &BTreeMap<ConversationId, u32> {
        &self.counts
    }

    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.counts.contains_key(conversation_id)
    }

    #[cfg(test)]
    pub(crate) fn holds_total_invariant(&self) -> bool {
        let sum: u64 = self.counts.values().map(|count| u64::from(*count)).sum();
        sum == u64::from(self.total)
    }
}

fn id_count(ids: &BTreeSet<MessageId>) -> u32 {
    u32::try_from(ids.len()).unwrap_or(u32::MAX)
}
