//! Domain layer: conversations, messages and the per-viewer unread index.

pub mod conversation;
pub mod message;
pub mod status;
pub mod unread_index;
pub mod viewer;

/// Returns the domain module name for smoke checks.
pub fn module_name() -> &'static str {
    "domain"
}
