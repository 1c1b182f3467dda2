use crate::domain::{
    message::{ConversationId, SenderRole},
    viewer::{Viewer, ViewerId},
};

/// A referral/support thread between one agent and the admin side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub agent_id: ViewerId,
}

impl Conversation {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            id: ConversationId::new(id),
            agent_id: ViewerId::new(agent_id),
        }
    }

    /// Agents see their own threads; admins see every thread.
    pub fn is_visible_to(&self, viewer: &Viewer) -> bool {
        match viewer.role {
            SenderRole::Admin => true,
            SenderRole::Agent => self.agent_id == viewer.id,
        }
    }
}
