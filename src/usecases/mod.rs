//! Use case layer: the per-viewer unread tracker and what feeds and renders it.

pub mod bootstrap;
pub mod context;
pub mod live_updates;
pub mod notifications;
mod tracker_core;
pub mod unread_tracker;

/// Returns the usecases module name for smoke checks.
pub fn module_name() -> &'static str {
    "usecases"
}
