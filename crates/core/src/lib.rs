//! # Hisho Core
//!
//! Domain types, traits, and error definitions for the Hisho assistant runtime.
//! This crate has **no transport or runtime dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here. Implementations live in their
//! respective crates:
//! - [`Provider`]: the hosted language-model runtime (`hisho-providers`)
//! - [`Tool`]: a single credential-bound capability (`hisho-tools`)
//! - [`CapabilityFactory`]: builds a fresh capability set per request (`hisho-tools`)

pub mod credential;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use credential::Credential;
pub use error::{Error, Result};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{CapabilityFactory, Tool, ToolCall, ToolRegistry, ToolResult};
