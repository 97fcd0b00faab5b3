//! The agent loop runtime.
//!
//! The loop follows a **call → dispatch → observe** cycle:
//!
//! 1. **Prepare** the context window (compacting history when it grows)
//! 2. **Call the model** with the window and the tool schemas
//! 3. **If tool calls**: run them through the executor, append every
//!    result, loop back to step 1
//! 4. **If text**: the run is complete
//!
//! Iteration and token limits, cancellation and deadlines end a run with
//! a status and best-effort text rather than an error.

pub mod builder;
pub mod context;
pub mod delegation;
pub mod executor;
pub mod facts;
pub mod loop_runner;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use builder::{build_agent, fact_store_from_config};
pub use context::{CompactionTier, ContextError, ContextManager, ContextPolicy, ContextWindow};
pub use delegation::{DelegateTool, delegate};
pub use executor::{CONFIRMATION_SENTINEL, ExecutedCall, ToolExecutor, ToolOutcome};
pub use loop_runner::{AgentLoop, CheckpointHook, RetryPolicy};
