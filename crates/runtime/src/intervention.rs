//! "Change of mind" detection and targeted cancellation.
//!
//! A cheap keyword pre-filter keeps the classifier off the hot path; the
//! LLM classification is authoritative. When the classifier is unreachable
//! the heuristic alone never cancels — a false positive here kills real
//! in-flight work, a false negative just lets a turn finish.

use serde_json::Value;

use sentra_domain::{CancelScope, ChatMessage, IncomingMessage};
use sentra_llm::ChatOptions;

use crate::state::AppState;

/// Phrases that suggest the sender is retracting or changing a request.
const INTERVENTION_HINTS: &[&str] = &[
    "改主意",
    "算了",
    "别做了",
    "先停",
    "停下",
    "取消",
    "不用了",
    "换个",
    "等一下",
    "stop that",
    "cancel that",
    "never mind",
    "forget it",
];

pub fn heuristic_match(text: &str) -> bool {
    let lowered = text.to_lowercase();
    INTERVENTION_HINTS.iter().any(|hint| lowered.contains(hint))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterventionVerdict {
    pub override_intent: bool,
    /// Epoch ms; runs started at or before this are stale. `None` means
    /// the whole conversation's work is moot.
    pub cutoff_ts: Option<i64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CLASSIFY_PROMPT: &str = "A user previously asked an assistant to do something, and work may \
still be running. Given their newest message, decide whether they are retracting or replacing \
that request. Answer with only a JSON object: {\"overrideIntent\": true|false, \"cutoffTs\": \
<epoch milliseconds before which work is stale, or null>}.";

async fn classify(state: &AppState, msg: &IncomingMessage) -> Option<InterventionVerdict> {
    let cfg = state.config.snapshot();
    let opts = ChatOptions::from_config(&cfg.llm);

    let messages = [
        ChatMessage::system(CLASSIFY_PROMPT),
        ChatMessage::user(format!(
            "now_ms={}\nmessage: {}",
            crate::now_ms(),
            msg.text
        )),
    ];

    let raw = match state.llm.chat(&messages, &opts).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "intervention classifier unavailable");
            return None;
        }
    };
    parse_verdict(&raw)
}

/// Tolerant JSON extraction: the model may wrap the object in prose.
fn parse_verdict(raw: &str) -> Option<InterventionVerdict> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    Some(InterventionVerdict {
        override_intent: value["overrideIntent"].as_bool().unwrap_or(false),
        cutoff_ts: value["cutoffTs"].as_i64(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run intervention detection for an inbound message. On confirmed intent,
/// flags the sender's active tasks cancelled and cancels the matching runs
/// in this conversation only. Returns whether a cancellation fired; the
/// caller processes the message normally either way.
pub async fn handle_intervention(state: &AppState, msg: &IncomingMessage) -> bool {
    if !heuristic_match(&msg.text) {
        return false;
    }
    let Some(verdict) = classify(state, msg).await else {
        return false;
    };
    if !verdict.override_intent {
        return false;
    }

    let flagged = state.tasks.mark_tasks_cancelled_for_sender(&msg.sender_id);
    let scope = match verdict.cutoff_ts {
        Some(ts) => CancelScope::Cutoff(ts),
        None => CancelScope::Conversation,
    };
    let key = msg.conversation_key();
    let cancelled = state
        .runs
        .cancel(state.mcp.as_ref(), &msg.sender_id, Some(&key), scope)
        .await;

    tracing::info!(
        sender = %msg.sender_id,
        key = %key,
        flagged_tasks = flagged,
        cancelled_runs = cancelled.len(),
        "intervention applied"
    );
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pre-reply pass
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PRE_REPLY_PROMPT: &str = "You screen group-chat messages for a conversational bot. Given \
the message, answer only \"yes\" if the bot joining in would be welcome and natural, otherwise \
\"no\".";

/// Lightweight screen for non-mandatory admissions. Fails open: when the
/// classifier is unreachable the reply goes ahead.
pub async fn pre_reply_worth(state: &AppState, msg: &IncomingMessage) -> bool {
    let cfg = state.config.snapshot();
    let opts = ChatOptions::from_config(&cfg.llm);
    let messages = [
        ChatMessage::system(PRE_REPLY_PROMPT),
        ChatMessage::user(msg.text.clone()),
    ];
    match state.llm.chat(&messages, &opts).await {
        Ok(answer) => !answer.trim().to_lowercase().starts_with("no"),
        Err(e) => {
            tracing::debug!(error = %e, "pre-reply check unavailable, allowing");
            true
        }
    }
}
