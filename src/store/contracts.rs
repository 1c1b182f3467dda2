use std::{collections::BTreeSet, future::Future, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{
    message::{ConversationId, Message, MessageId, SenderRole},
    viewer::Viewer,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
    #[error("store call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("insert feed closed")]
    FeedClosed,
}

/// Ordered stream of inserted messages; `None` from `recv` means the feed dropped.
pub type InsertStream = mpsc::Receiver<Message>;

/// Remote relational store holding conversations and messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn query_conversation_ids(
        &self,
        viewer: &Viewer,
    ) -> Result<BTreeSet<ConversationId>, StoreError>;

    /// Counts messages with `is_read = false` whose sender is not `exclude_role`.
    async fn query_unread_count(
        &self,
        conversation_id: &ConversationId,
        exclude_role: SenderRole,
    ) -> Result<u32, StoreError>;

    /// Ids of the messages `query_unread_count` would count, read in one pass.
    async fn query_unread_ids(
        &self,
        conversation_id: &ConversationId,
        exclude_role: SenderRole,
    ) -> Result<BTreeSet<MessageId>, StoreError>;

    /// Marks every message not sent by `exclude_role` in the conversation as read.
    async fn update_messages_read(
        &self,
        conversation_id: &ConversationId,
        exclude_role: SenderRole,
    ) -> Result<(), StoreError>;
}

/// Push channel of newly inserted messages. No server-side recipient filter.
pub trait InsertFeed: Send + Sync {
    fn subscribe_inserts(&self) -> Result<InsertStream, StoreError>;
}

pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
