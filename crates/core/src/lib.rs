//! # agentloop core
//!
//! Domain types, traits, and error definitions for the agentloop
//! tool-calling runtime. Every subsystem is defined as a trait or value
//! type here; implementations live in their own crates and depend inward
//! on this one.

pub mod error;
pub mod event;
pub mod gateway;
pub mod memory;
pub mod message;
pub mod run;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{CheckpointError, Error, GatewayError, MemoryError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use gateway::{GatewayRequest, GatewayResponse, ModelGateway, ModelReply, Usage};
pub use memory::{FactStore, MemoryFact};
pub use message::{Message, MessageStore, Role, ToolCallRequest};
pub use run::{
    Digest, PendingInput, RunCheckpoint, RunPolicy, RunResult, RunState, RunStatus, StopReason,
};
pub use tool::{RiskLevel, Tool, ToolDefinition, ToolOutput, ToolRegistry, ToolSchema};
