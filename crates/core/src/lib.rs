//! # InfraPilot Core
//!
//! Domain types, traits, and error definitions for the InfraPilot agent.
//! This crate has **no framework dependencies**: it defines the message
//! history, the tool contract and the model-backend contract that every
//! other crate implements against.
//!
//! ## Layout
//!
//! - [`message`]: threads, messages and the append-only [`MessageHistory`]
//! - [`tool`]: the [`Tool`] trait and the closed [`ToolRegistry`]
//! - [`provider`]: the [`Provider`] trait over LLM backends
//! - [`error`]: the top-level [`Error`] and bounded-context errors

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Message, MessageHistory, MessageToolCall, Role, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use tool::{Tool, ToolCall, ToolDescriptor, ToolRegistry, ToolResult};
