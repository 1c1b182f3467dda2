//! TOML seed files for the in-memory store.
//!
//! ```toml
//! mark_read = ["ref-100"]
//!
//! [[conversations]]
//! id = "ref-100"
//! agent = "agent-7"
//!
//! [[messages]]
//! id = "m-1"
//! conversation = "ref-100"
//! sender = "admin"
//! read = false
//!
//! [[live]]
//! id = "m-2"
//! conversation = "ref-100"
//! sender = "admin"
//! ```

use std::{fs, path::Path};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::{
    domain::{
        conversation::Conversation,
        message::{ConversationId, Message, MessageId, SenderRole},
    },
    infra::error::AppError,
    store::memory::InMemoryMessageStore,
};

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct Fixture {
    #[serde(default)]
    pub conversations: Vec<FixtureConversation>,
    #[serde(default)]
    pub messages: Vec<FixtureMessage>,
    /// Messages inserted through the live feed after the snapshot load.
    #[serde(default)]
    pub live: Vec<FixtureMessage>,
    #[serde(default)]
    pub mark_read: Vec<ConversationId>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FixtureConversation {
    pub id: String,
    pub agent: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FixtureMessage {
    pub id: String,
    pub conversation: String,
    pub sender: SenderRole,
    #[serde(default)]
    pub read: bool,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|source| AppError::FixtureRead {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&raw).map_err(|source| AppError::FixtureParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Registers conversations and seeds stored messages without touching the feed.
    pub fn seed(&self, store: &InMemoryMessageStore, base: DateTime<Utc>) -> Result<(), AppError> {
        for conversation in &self.conversations {
            store
                .add_conversation(Conversation::new(&conversation.id, &conversation.agent))
                .map_err(AppError::FixtureSeed)?;
        }

        for (offset, message) in self.messages.iter().enumerate() {
            store
                .seed_message(message.to_message(base, offset))
                .map_err(AppError::FixtureSeed)?;
        }

        Ok(())
    }

    /// Live messages, timestamped after every seeded one.
    pub fn live_messages(&self, base: DateTime<Utc>) -> Vec<Message> {
        let start = self.messages.len();
        self.live
            .iter()
            .enumerate()
            .map(|(offset, message)| message.to_message(base, start + offset))
            .collect()
    }
}

impl FixtureMessage {
    fn to_message(&self, base: DateTime<Utc>, offset: usize) -> Message {
        let seconds = i64::from(u32::try_from(offset).unwrap_or(u32::MAX));
        Message {
            id: MessageId::new(&self.id),
            conversation_id: ConversationId::new(&self.conversation),
            sender_role: self.sender,
            created_at: base + Duration::seconds(seconds),
            is_read: self.read,
        }
    }
}
