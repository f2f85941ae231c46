//! Subscriber and source identifiers for the reactive system.
//!
//! A subscriber is any computation that depends on reactive values: memos and
//! effects. A source is anything that can be read inside such a computation:
//! signals and memos. Memos are both.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Each subscriber (memo or effect) gets a unique ID when created. This ID is
/// used to track dependencies and to deduplicate queued re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of a readable reactive value (a signal or a memo).
pub type SourceId = u64;

/// Generate a new unique source ID.
///
/// Signals and memos draw from the same counter so their IDs never collide in
/// the runtime's subscription table.
pub(crate) fn next_source_id() -> SourceId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
