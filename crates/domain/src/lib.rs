//! Shared domain types for the Sentra agent runtime: the error type, the
//! env-driven configuration layer, message/conversation identities, MCP
//! stream events, and reply-gate decisions.

pub mod config;
pub mod decision;
pub mod error;
pub mod mcp;
pub mod message;

pub use decision::{CancelScope, ReplyDecision};
pub use error::{Error, Result};
pub use mcp::{McpEvent, McpRunInput};
pub use message::{
    conversation_id, merge_messages, ChatMessage, ConversationKey, IncomingMessage, MessageKind,
    Role,
};
