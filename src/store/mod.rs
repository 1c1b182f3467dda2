//! Store layer: message store contracts, the in-memory store and the shared feed hub.

pub mod contracts;
pub mod feed_hub;
pub mod memory;

/// Returns the store module name for smoke checks.
pub fn module_name() -> &'static str {
    "store"
}
