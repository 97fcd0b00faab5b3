//! Context window management.
//!
//! Token estimation plus the tiered compaction that keeps every model
//! call under the configured context size.

pub mod manager;
pub mod token;

pub use manager::{
    CompactionTier, ContextError, ContextManager, ContextPolicy, ContextWindow, DIGEST_HEADER,
};
