use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify,
};

use crate::{
    domain::{
        conversation::Conversation,
        message::{ConversationId, Message, MessageId, SenderRole},
        viewer::Viewer,
    },
    store::contracts::{InsertFeed, InsertStream, MessageStore, StoreError},
};

const DEFAULT_FEED_CAPACITY: usize = 256;
const MEMORY_FEED_SUBSCRIBER_DROPPED: &str = "MEMORY_FEED_SUBSCRIBER_DROPPED";

/// Process-local message store with an insert feed.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    inner: Mutex<MemoryState>,
    feed_capacity: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: Vec<Message>,
    subscribers: Vec<mpsc::Sender<Message>>,
    #[cfg(test)]
    faults: Faults,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct Faults {
    fail_queries: bool,
    fail_updates: bool,
    fail_subscribe: bool,
    update_ack_gate: Option<Arc<Notify>>,
    insert_during_unread_query: Option<Message>,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(feed_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryState::default()),
            feed_capacity: feed_capacity.max(1),
        }
    }

    pub fn add_conversation(&self, conversation: Conversation) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    /// Seeds a message without notifying the insert feed.
    pub fn seed_message(&self, message: Message) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        ensure_known_conversation(&state, &message.conversation_id)?;
        state.messages.push(message);
        Ok(())
    }

    /// Stores a message and pushes it to every live subscriber.
    pub fn insert_message(&self, message: Message) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        ensure_known_conversation(&state, &message.conversation_id)?;
        state.insert_and_publish(message);
        Ok(())
    }

    /// Closes every open insert stream, as a dropped realtime connection would.
    pub fn disconnect_feeds(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let dropped = state.subscribers.len();
        state.subscribers.clear();
        Ok(dropped)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.subscribers.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store state poisoned".to_owned()))
    }
}

impl MemoryState {
    fn insert_and_publish(&mut self, message: Message) {
        self.messages.push(message.clone());
        self.subscribers
            .retain(|subscriber| match subscriber.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        code = MEMORY_FEED_SUBSCRIBER_DROPPED,
                        "insert feed subscriber fell behind and was disconnected"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }
}

#[cfg(test)]
impl InMemoryMessageStore {
    /// Inserts `message` (store and feed) at the start of the next unread-ids query,
    /// as a write racing that query would land.
    pub fn insert_during_next_unread_query(&self, message: Message) {
        if let Ok(mut state) = self.inner.lock() {
            state.faults.insert_during_unread_query = Some(message);
        }
    }

    pub fn fail_queries(&self, enabled: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.faults.fail_queries = enabled;
        }
    }

    pub fn fail_updates(&self, enabled: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.faults.fail_updates = enabled;
        }
    }

    pub fn fail_subscribe(&self, enabled: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.faults.fail_subscribe = enabled;
        }
    }

    /// Makes `update_messages_read` apply its write, then wait on the gate before acknowledging.
    pub fn hold_update_acks(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        if let Ok(mut state) = self.inner.lock() {
            state.faults.update_ack_gate = Some(Arc::clone(&gate));
        }
        gate
    }

    pub fn is_read(&self, message_id: &str) -> Option<bool> {
        self.inner.lock().ok().and_then(|state| {
            state
                .messages
                .iter()
                .find(|message| message.id.as_str() == message_id)
                .map(|message| message.is_read)
        })
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn query_conversation_ids(
        &self,
        viewer: &Viewer,
    ) -> Result<BTreeSet<ConversationId>, StoreError> {
        let state = self.lock()?;
        #[cfg(test)]
        {
            if state.faults.fail_queries {
                return Err(StoreError::Unavailable("conversation query failed".to_owned()));
            }
        }

        Ok(state
            .conversations
            .values()
            .filter(|conversation| conversation.is_visible_to(viewer))
            .map(|conversation| conversation.id.clone())
            .collect())
    }

    async fn query_unread_count(
        &self,
        conversation_id: &ConversationId,
        exclude_role: SenderRole,
    ) -> Result<u32, StoreError> {
        let state = self.lock()?;
        #[cfg(test)]
        {
            if state.faults.fail_queries {
                return Err(StoreError::Unavailable("unread count query failed".to_owned()));
            }
        }

        let count = state
            .messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .filter(|message| message.is_unread_for(exclude_role))
            .count();

        u32::try_from(count)
            .map_err(|_| StoreError::Rejected(format!("unread count overflow for {conversation_id}")))
    }

    async fn query_unread_ids(
        &self,
        conversation_id: &ConversationId,
        exclude_role: SenderRole,
    ) -> Result<BTreeSet<MessageId>, StoreError> {
        #[cfg_attr(not(test), allow(unused_mut))]
        let mut state = self.lock()?;
        #[cfg(test)]
        {
            if state.faults.fail_queries {
                return Err(StoreError::Unavailable("unread ids query failed".to_owned()));
            }
            if let Some(racing) = state.faults.insert_during_unread_query.take() {
                state.insert_and_publish(racing);
            }
        }

        Ok(state
            .messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .filter(|message| message.is_unread_for(exclude_role))
            .map(|message| message.id.clone())
            .collect())
    }

    async fn update_messages_read(
        &self,
        conversation_id: &ConversationId,
        exclude_role: SenderRole,
    ) -> Result<(), StoreError> {
        #[cfg_attr(not(test), allow(unused_mut))]
        let mut ack_gate: Option<Arc<Notify>> = None;
        {
            let mut state = self.lock()?;
            #[cfg(test)]
            {
                if state.faults.fail_updates {
                    return Err(StoreError::Unavailable("read flag update failed".to_owned()));
                }
                ack_gate = state.faults.update_ack_gate.clone();
            }

            ensure_known_conversation(&state, conversation_id)?;
            state
                .messages
                .iter_mut()
                .filter(|message| &message.conversation_id == conversation_id)
                .filter(|message| message.sender_role != exclude_role)
                .for_each(|message| message.is_read = true);
        }

        if let Some(gate) = ack_gate {
            gate.notified().await;
        }

        Ok(())
    }
}

impl InsertFeed for InMemoryMessageStore {
    fn subscribe_inserts(&self) -> Result<InsertStream, StoreError> {
        let mut state = self.lock()?;
        #[cfg(test)]
        {
            if state.faults.fail_subscribe {
                return Err(StoreError::Unavailable("insert feed refused subscription".to_owned()));
            }
        }

        let (tx, rx) = mpsc::channel(self.feed_capacity);
        state.subscribers.push(tx);
        Ok(rx)
    }
}

fn ensure_known_conversation(
    state: &MemoryState,
    conversation_id: &ConversationId,
) -> Result<(), StoreError> {
    if state.conversations.contains_key(conversation_id) {
        Ok(())
    } else {
        Err(StoreError::Rejected(format!(
            "unknown conversation {conversation_id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{conversation, message};

    fn seeded_store() -> InMemoryMessageStore {
        let store = InMemoryMessageStore::new();
        store
            .add_conversation(Conversation::new("A", "agent-1"))
            .expect("conversation A");
        store
            .add_conversation(Conversation::new("B", "agent-2"))
            .expect("conversation B");
        store
            .seed_message(message("m1", "A", SenderRole::Admin))
            .expect("seed m1");
        store
            .seed_message(message("m2", "A", SenderRole::Agent))
            .expect("seed m2");
        store
            .seed_message(message("m3", "B", SenderRole::Admin))
            .expect("seed m3");
        store
    }

    #[tokio::test]
    async fn agent_only_sees_own_conversation_ids() {
        let store = seeded_store();
        let viewer = Viewer::new("agent-1", SenderRole::Agent).expect("viewer");

        let ids = store
            .query_conversation_ids(&viewer)
            .await
            .expect("query should succeed");

        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![conversation("A")]);
    }

    #[tokio::test]
    async fn unread_count_excludes_viewer_role() {
        let store = seeded_store();

        let for_agent = store
            .query_unread_count(&conversation("A"), SenderRole::Agent)
            .await
            .expect("count");
        let for_admin = store
            .query_unread_count(&conversation("A"), SenderRole::Admin)
            .await
            .expect("count");

        assert_eq!(for_agent, 1);
        assert_eq!(for_admin, 1);
    }

    #[tokio::test]
    async fn unread_ids_match_unread_count() {
        let store = seeded_store();

        let ids = store
            .query_unread_ids(&conversation("A"), SenderRole::Agent)
            .await
            .expect("ids");
        let count = store
            .query_unread_count(&conversation("A"), SenderRole::Agent)
            .await
            .expect("count");

        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![MessageId::new("m1")]);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn update_marks_only_other_role_messages() {
        let store = seeded_store();

        store
            .update_messages_read(&conversation("A"), SenderRole::Agent)
            .await
            .expect("update should succeed");

        assert_eq!(store.is_read("m1"), Some(true));
        assert_eq!(store.is_read("m2"), Some(false));
        assert_eq!(store.is_read("m3"), Some(false));
    }

    #[tokio::test]
    async fn insert_is_pushed_to_subscribers() {
        let store = seeded_store();
        let mut stream = store.subscribe_inserts().expect("subscribe");

        store
            .insert_message(message("m4", "B", SenderRole::Agent))
            .expect("insert");

        let delivered = stream.recv().await.expect("message should be delivered");
        assert_eq!(delivered.id.as_str(), "m4");
    }

    #[tokio::test]
    async fn disconnect_closes_open_streams() {
        let store = seeded_store();
        let mut stream = store.subscribe_inserts().expect("subscribe");

        assert_eq!(store.disconnect_feeds().expect("disconnect"), 1);

        assert!(stream.recv().await.is_none());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn rejects_messages_for_unknown_conversations() {
        let store = seeded_store();

        let err = store
            .insert_message(message("m9", "Z", SenderRole::Admin))
            .expect_err("unknown conversation must be rejected");

        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_when_queue_is_full() {
        let store = InMemoryMessageStore::with_feed_capacity(1);
        store
            .add_conversation(Conversation::new("A", "agent-1"))
            .expect("conversation");
        let mut stream = store.subscribe_inserts().expect("subscribe");

        store
            .insert_message(message("m1", "A", SenderRole::Admin))
            .expect("insert m1");
        store
            .insert_message(message("m2", "A", SenderRole::Admin))
            .expect("insert m2");

        assert_eq!(
            stream.recv().await.map(|m| m.id.as_str().to_owned()),
            Some("m1".to_owned())
        );
        assert!(stream.recv().await.is_none());
    }
}
