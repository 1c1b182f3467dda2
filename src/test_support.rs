use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use chrono::Utc;
use tokio::sync::watch;

use crate::domain::{
    message::{ConversationId, Message, MessageId, SenderRole},
    status::UnreadSnapshot,
};

const SNAPSHOT_WAIT: Duration = Duration::from_secs(2);

pub fn conversation(id: &str) -> ConversationId {
    ConversationId::new(id)
}

pub fn message(id: &str, conversation_id: &str, sender_role: SenderRole) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation_id),
        sender_role,
        created_at: Utc::now(),
        is_read: false,
    }
}

/// Snapshot of unread ids with ids named `<conversation>-<n>`.
pub fn unread_ids(entries: &[(&str, u32)]) -> BTreeMap<ConversationId, BTreeSet<MessageId>> {
    entries
        .iter()
        .map(|(id, count)| {
            let ids = (0..*count)
                .map(|n| MessageId::new(format!("{id}-{n}")))
                .collect();
            (conversation(id), ids)
        })
        .collect()
}

/// Waits until a published snapshot satisfies `predicate`, panicking after a short deadline.
pub async fn wait_for_snapshot<F>(rx: &mut watch::Receiver<UnreadSnapshot>, predicate: F) -> UnreadSnapshot
where
    F: FnMut(&UnreadSnapshot) -> bool,
{
    tokio::time::timeout(SNAPSHOT_WAIT, rx.wait_for(predicate))
        .await
        .expect("snapshot condition should be reached before deadline")
        .expect("tracker should still be publishing")
        .clone()
}
