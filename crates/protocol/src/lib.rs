//! Adapter RPC protocol: the JSON frames exchanged with the IM adapter over
//! the persistent WebSocket connection.
//!
//! Flow:
//! 1. The agent connects; the adapter sends `welcome`.
//! 2. The adapter pushes `message` frames; the agent pushes request frames
//!    (`send_text`, …) carrying a `requestId`.
//! 3. The adapter answers each request with `{type:"result", requestId, ok}`.
//! 4. `ping`/`pong` keep the link alive; `shutdown` asks for a clean stop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sentra_domain::IncomingMessage;

/// Max outbound reply payload size in bytes. Longer replies are truncated by
/// the caller before framing.
pub const MAX_SEND_TEXT_BYTES: usize = 64 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// WebSocket frame envelope (both directions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdapterFrame {
    /// Adapter → Agent: connection accepted.
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        adapter_version: Option<String>,
    },

    /// Bidirectional heartbeat.
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// Heartbeat response.
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    /// Adapter → Agent: stop intake and drain.
    #[serde(rename = "shutdown")]
    Shutdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Adapter → Agent: reply to an earlier request.
    #[serde(rename = "result")]
    Result {
        #[serde(rename = "requestId")]
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
    },

    /// Adapter → Agent: an inbound chat message.
    #[serde(rename = "message")]
    Message { data: IncomingMessage },

    /// Agent → Adapter: deliver a text reply.
    #[serde(rename = "send_text")]
    SendText {
        #[serde(rename = "requestId")]
        request_id: String,
        data: SendText,
    },

    /// Agent → Adapter: re-pull the social graph (group members, names).
    /// Issued best-effort after every (re)connect.
    #[serde(rename = "refresh_social_context")]
    RefreshSocialContext {
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

impl AdapterFrame {
    /// The correlation id, for frames that carry one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Result { request_id, .. }
            | Self::SendText { request_id, .. }
            | Self::RefreshSocialContext { request_id } => Some(request_id),
            _ => None,
        }
    }

    /// Assign a fresh `requestId` to an outbound request that lacks one.
    pub fn ensure_request_id(&mut self) {
        let slot = match self {
            Self::SendText { request_id, .. } => request_id,
            Self::RefreshSocialContext { request_id } => request_id,
            _ => return,
        };
        if slot.is_empty() {
            *slot = uuid::Uuid::new_v4().to_string();
        }
    }

    /// Overwrite the `requestId` (each RPC retry re-sends under a fresh id
    /// so a late result for an abandoned attempt cannot resolve the new one).
    pub fn set_request_id(&mut self, id: String) {
        match self {
            Self::SendText { request_id, .. } => *request_id = id,
            Self::RefreshSocialContext { request_id } => *request_id = id,
            _ => {}
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One outbound text reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendText {
    /// `G:<gid>` or `U:<uid>` — the adapter resolves the destination.
    pub conversation_key: String,
    pub text: String,
    /// When set, the adapter renders the reply quoting this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_message_id: Option<String>,
}
