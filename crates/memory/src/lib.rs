//! Fact store implementations for agentloop.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileFactStore;
pub use in_memory::InMemoryFactStore;

use agentloop_core::memory::{MemoryFact, rank_facts};
use chrono::{DateTime, Utc};

/// Live facts matching `query`, ranked and truncated to `limit`.
pub(crate) fn select_facts<'a>(
    facts: impl Iterator<Item = &'a MemoryFact>,
    query: &str,
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<MemoryFact> {
    let mut results: Vec<MemoryFact> = facts
        .filter(|f| !f.is_expired_at(now) && f.matches(query))
        .cloned()
        .collect();
    rank_facts(&mut results);
    results.truncate(limit);
    results
}
