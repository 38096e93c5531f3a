//! Inbound message model and conversation identity derivation.
//!
//! Two distinct identities are computed from a message:
//! - the **conversation key** (`G:<gid>` / `U:<uid>`) scopes history and
//!   memory;
//! - the **conversation id** (`group_<gid>_sender_<uid>` / `private_<uid>`)
//!   scopes active-task admission, so one user talking in two places holds
//!   two independent slots.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles & chat messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged prompt message, shared by the LLM client and the MCP
/// conversation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incoming message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Group,
    Private,
}

/// One chat message as delivered by the IM adapter. Immutable after receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub message_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub at_users: Vec<String>,
    /// True when this message is a quoted reply to one of the bot's own.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reply_to_bot: bool,
    #[serde(default)]
    pub time_str: String,

    // Synthetic-message markers set by the delay worker and the recovery
    // scheduler, never by the adapter.
    #[serde(default, rename = "_proactive", skip_serializing_if = "std::ops::Not::not")]
    pub proactive: bool,
    #[serde(
        default,
        rename = "_taskRecoveryAttempt",
        skip_serializing_if = "Option::is_none"
    )]
    pub recovery_attempt: Option<u32>,
    #[serde(
        default,
        rename = "_disablePreReply",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub disable_pre_reply: bool,
    #[serde(
        default,
        rename = "_sentraRootDirectiveXml",
        skip_serializing_if = "Option::is_none"
    )]
    pub root_directive_xml: Option<String>,
}

impl IncomingMessage {
    /// The text used when coalescing: the summary when present (media
    /// messages arrive pre-summarized), the raw text otherwise.
    pub fn effective_text(&self) -> &str {
        match &self.summary {
            Some(s) if !s.is_empty() => s,
            _ => &self.text,
        }
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::for_message(self)
    }

    pub fn conversation_id(&self) -> String {
        conversation_id(self)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sharding key for history, memory, bundlers, and the run registry:
/// `G:<gid>` for group chats, `U:<uid>` for private chats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn group(group_id: &str) -> Self {
        Self(format!("G:{group_id}"))
    }

    pub fn user(user_id: &str) -> Self {
        Self(format!("U:{user_id}"))
    }

    pub fn for_message(msg: &IncomingMessage) -> Self {
        match (&msg.kind, &msg.group_id) {
            (MessageKind::Group, Some(gid)) => Self::group(gid),
            _ => Self::user(&msg.sender_id),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.starts_with("G:")
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Admission scope for the active-task registry. A sender in two group
/// chats (or a group chat and a private chat) holds independent slots.
pub fn conversation_id(msg: &IncomingMessage) -> String {
    match (&msg.kind, &msg.group_id) {
        (MessageKind::Group, Some(gid)) => {
            format!("group_{gid}_sender_{}", msg.sender_id)
        }
        _ => format!("private_{}", msg.sender_id),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Coalesce consecutive messages from one sender into a single synthesized
/// message: newline-joined effective texts in arrival order, duplicates (by
/// `message_id`) dropped, identity fields taken from the first message and
/// `at_users` unioned across all of them.
///
/// Returns `None` for an empty slice.
pub fn merge_messages(messages: &[IncomingMessage]) -> Option<IncomingMessage> {
    let first = messages.first()?;
    let mut merged = first.clone();

    let mut seen_ids = std::collections::HashSet::new();
    let mut parts: Vec<&str> = Vec::with_capacity(messages.len());
    let mut at_users: Vec<String> = Vec::new();

    for msg in messages {
        if !msg.message_id.is_empty() && !seen_ids.insert(msg.message_id.as_str()) {
            continue;
        }
        parts.push(msg.effective_text());
        for at in &msg.at_users {
            if !at_users.contains(at) {
                at_users.push(at.clone());
            }
        }
    }

    merged.text = parts.join("\n");
    merged.summary = None;
    merged.at_users = at_users;
    // The synthesized message carries the newest timestamp.
    if let Some(last) = messages.last() {
        merged.time_str = last.time_str.clone();
    }
    Some(merged)
}
