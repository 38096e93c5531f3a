//! MCP executor stream events.
//!
//! The executor delivers heterogeneous JSON frames; they are decoded into a
//! closed sum type so every consumer matches exhaustively. Frames with an
//! unrecognized `type` are preserved as [`McpEvent::Unknown`] rather than
//! dropped, so the turn pipeline can log them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ChatMessage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to one MCP run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRunInput {
    /// The user-side objective for this run (the synthesized question XML).
    pub objective: String,
    /// Prior context in protocol form: system prompt, history pairs, and the
    /// current user message.
    pub conversation: Vec<ChatMessage>,
    /// Free-form per-run overlays (base template selection, directives).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub overlays: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownEvent {
    Start {
        run_id: String,
    },
    Judge {
        need: bool,
    },
    Plan {
        #[serde(default)]
        steps: Vec<String>,
    },
    ToolResult {
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        payload: Value,
    },
    Summary {
        #[serde(default)]
        text: Option<String>,
    },
}

/// One event on an MCP run stream.
#[derive(Debug, Clone, PartialEq)]
pub enum McpEvent {
    /// The run was admitted; `run_id` identifies it for cancellation.
    Start { run_id: String },
    /// The executor's own reply-necessity judgement.
    Judge { need: bool },
    /// Informational plan announcement.
    Plan { steps: Vec<String> },
    /// One tool round finished; the payload feeds the next LLM call.
    ToolResult { tool: Option<String>, payload: Value },
    /// Terminal event: the run is complete.
    Summary { text: Option<String> },
    /// Unrecognized frame, kept verbatim for logging.
    Unknown { raw: Value },
}

impl McpEvent {
    /// Decode a raw frame. Never fails: anything that does not match a known
    /// event shape becomes [`McpEvent::Unknown`].
    pub fn from_value(raw: Value) -> Self {
        match serde_json::from_value::<KnownEvent>(raw.clone()) {
            Ok(KnownEvent::Start { run_id }) => Self::Start { run_id },
            Ok(KnownEvent::Judge { need }) => Self::Judge { need },
            Ok(KnownEvent::Plan { steps }) => Self::Plan { steps },
            Ok(KnownEvent::ToolResult { tool, payload }) => Self::ToolResult { tool, payload },
            Ok(KnownEvent::Summary { text }) => Self::Summary { text },
            Err(_) => Self::Unknown { raw },
        }
    }

    /// Whether this event terminates the run stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Summary { .. })
    }
}
