//! # stepwise core
//!
//! Domain types, traits, and error definitions for the stepwise agent runner.
//! This crate has no HTTP or process dependencies: it defines the domain
//! model that all other crates implement against.
//!
//! ## Seams
//!
//! - [`ChatClient`]: the chat-completion endpoint
//! - [`ToolRunner`]: the external tool executor
//! - [`Tool`]: in-process built-in tools
//!
//! Implementations live in `stepwise-providers` and `stepwise-tools`, so the
//! orchestration engine can be tested with scripted stand-ins.

pub mod channel;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{ChannelRoutes, Destination};
pub use error::{Error, ProviderError, Result, ToolError, TranscriptError};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{ChatClient, ChatRequest, ChatResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolRegistry, ToolRunner, ToolSpec};
