//! Unread-message tracking for agent/admin referral conversations.
//!
//! The core is [`usecases::unread_tracker::UnreadTracker`]: one instance per
//! viewer session, loaded from a [`store::contracts::MessageStore`] snapshot
//! and kept current by a live insert feed.

pub mod app;
pub mod cli;
pub mod domain;
pub mod infra;
pub mod store;
#[cfg(test)]
mod test_support;
pub mod usecases;
