use std::fmt;

use crate::domain::message::SenderRole;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewerId(String);

impl ViewerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The agent or admin session whose unread counts are tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: ViewerId,
    pub role: SenderRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerInputError {
    EmptyId,
    UnknownRole(String),
}

impl fmt::Display for ViewerInputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => f.write_str("viewer id is empty"),
            Self::UnknownRole(raw) if raw.trim().is_empty() => f.write_str("viewer role is empty"),
            Self::UnknownRole(raw) => write!(f, "unknown viewer role '{raw}'"),
        }
    }
}

impl std::error::Error for ViewerInputError {}

impl Viewer {
    pub fn new(id: &str, role: SenderRole) -> Result<Self, ViewerInputError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ViewerInputError::EmptyId);
        }

        Ok(Self {
            id: ViewerId::new(id),
            role,
        })
    }

    /// Builds a viewer from raw session input, where both fields are required.
    pub fn parse(id: &str, role: &str) -> Result<Self, ViewerInputError> {
        let role =
            SenderRole::parse(role).ok_or_else(|| ViewerInputError::UnknownRole(role.to_owned()))?;
        Self::new(id, role)
    }
}
