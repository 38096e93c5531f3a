//! Turn pipeline — one admitted bundle in, at most one conversation pair
//! out.
//!
//! The pipeline streams an MCP run and folds its events into LLM calls and
//! adapter sends. Cancellation is cooperative: the task's cancel flag is
//! checked at every event boundary and before every send; a cancelled pair
//! is dropped, never persisted. Cleanup always runs: tracked runs are
//! untracked, the task slot is released, and the sender's buffered messages
//! chain into the next turn through the gate.

use std::future::Future;
use std::pin::Pin;

use futures_util::StreamExt;
use uuid::Uuid;

use sentra_domain::{ConversationKey, IncomingMessage, McpEvent, McpRunInput};
use sentra_llm::{chat_with_retry, ChatOptions, RetryPolicy};
use sentra_protocol::{AdapterFrame, SendText, MAX_SEND_TEXT_BYTES};

use crate::context::{self, wrap_tool_result, wrap_user_question};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The run finished (with or without replies) and saved state is
    /// consistent.
    Completed,
    /// The gate declined; no slot was taken.
    NoReply,
    /// The turn observed its cancel flag and stopped without persisting.
    Cancelled,
    /// The conversation slot was already held (recovery defers on this).
    Busy,
    Failed(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gate a synthesized bundle and, if admitted, run the turn on its own
/// task. Skipped messages are still recorded in history.
///
/// Boxed because this function and [`run_turn`] call each other through
/// `tokio::spawn`; without indirection rustc cannot resolve the resulting
/// mutually-recursive opaque future type.
pub fn dispatch_bundle(
    state: AppState,
    msg: IncomingMessage,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let cfg = state.config.snapshot();
        let decision = state.tasks.should_reply(&msg, state.policy.as_ref(), &cfg.reply);

        let Some(task_id) = decision.task_id else {
            record_skipped(&state, &msg);
            return;
        };

        // Optional lightweight pre-reply pass: may downgrade a non-mandatory
        // admission to skip before the turn actually starts.
        if cfg.reply.pre_reply_check && !decision.mandatory && !msg.disable_pre_reply {
            if !crate::intervention::pre_reply_worth(&state, &msg).await {
                tracing::debug!(sender = %msg.sender_id, "pre-reply check downgraded to skip");
                state.tasks.complete_task(&msg.sender_id, &task_id);
                state.tasks.clear_cancelled_task(&task_id);
                record_skipped(&state, &msg);
                return;
            }
        }

        tokio::spawn(async move {
            run_turn(state, msg, task_id).await;
        });
    })
}

/// Like [`dispatch_bundle`] but runs inline and reports the outcome; the
/// recovery scheduler needs both. Proactive messages are gate-mandatory,
/// so the only admission failure is a held slot.
pub async fn run_admitted(state: AppState, msg: IncomingMessage) -> TurnOutcome {
    let Some(task_id) = state.tasks.try_begin_task(&msg) else {
        return TurnOutcome::Busy;
    };
    run_turn(state, msg, task_id).await
}

fn record_skipped(state: &AppState, msg: &IncomingMessage) {
    let key = msg.conversation_key();
    if let Err(e) = state.history.record_unreplied(&key, &wrap_user_question(msg)) {
        tracing::warn!(key = %key, error = %e, "failed to record skipped message");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TurnCtx {
    key: ConversationKey,
    pair_id: Option<Uuid>,
    tracked_runs: Vec<String>,
    has_replied: bool,
    /// Pending-queue size when the turn started; growth beyond it is a
    /// mid-task correction the next model call should see.
    initial_pending: usize,
}

impl TurnCtx {
    fn ensure_pair(&mut self, state: &AppState, user_xml: &str) -> Uuid {
        match self.pair_id {
            Some(id) => id,
            None => {
                let id = state.history.begin_pair(&self.key, user_xml);
                self.pair_id = Some(id);
                id
            }
        }
    }

    fn cancel_pair(&mut self, state: &AppState) {
        if let Some(id) = self.pair_id.take() {
            state.history.cancel_pair(&id);
        }
    }

    fn finalize_pair(&mut self, state: &AppState) {
        if let Some(id) = self.pair_id.take() {
            match state.history.finalize_pair(&id) {
                Ok(true) => {}
                Ok(false) => tracing::debug!(pair_id = %id, "pair vanished before finalize"),
                Err(e) => tracing::warn!(pair_id = %id, error = %e, "pair finalize failed"),
            }
        }
    }
}

/// Execute one admitted turn to completion, then run cleanup and chain the
/// sender's buffered messages into the next turn.
pub async fn run_turn(state: AppState, msg: IncomingMessage, task_id: Uuid) -> TurnOutcome {
    let sender = msg.sender_id.clone();
    let mut ctx = TurnCtx {
        key: msg.conversation_key(),
        pair_id: None,
        tracked_runs: Vec::new(),
        has_replied: false,
        initial_pending: state.tasks.pending_count(&sender),
    };

    tracing::info!(sender = %sender, task_id = %task_id, key = %ctx.key, "turn started");
    let outcome = run_turn_inner(&state, &msg, &task_id, &mut ctx).await;
    tracing::info!(sender = %sender, task_id = %task_id, outcome = ?outcome, "turn finished");

    // ── Cleanup (always) ─────────────────────────────────────────────
    for run_id in &ctx.tracked_runs {
        state.runs.untrack(&sender, &ctx.key, run_id);
        if outcome == TurnOutcome::Completed {
            state.message_cache.remove(run_id);
        }
    }
    if outcome == TurnOutcome::Completed {
        let state2 = state.clone();
        let key = ctx.key.clone();
        tokio::spawn(async move {
            maintain_history(state2, key).await;
        });
    }

    let next = state.tasks.complete_task(&sender, &task_id);
    state.tasks.clear_cancelled_task(&task_id);

    if let Some(next_msg) = next {
        tracing::debug!(sender = %sender, text = %next_msg.text, "chaining drained pending bundle");
        let state2 = state.clone();
        tokio::spawn(async move {
            dispatch_bundle(state2, next_msg).await;
        });
    }

    outcome
}

async fn run_turn_inner(
    state: &AppState,
    msg: &IncomingMessage,
    task_id: &Uuid,
    ctx: &mut TurnCtx,
) -> TurnOutcome {
    let cfg = state.config.snapshot();
    let opts = ChatOptions::from_config(&cfg.llm);
    let retry = RetryPolicy::from_config(&cfg.llm);

    // ── Build context and start the run ──────────────────────────────
    let assembled = context::assemble(state, msg, &ctx.key).await;
    let mut messages = assembled.messages;
    let objective = assembled.objective;

    let run_input = McpRunInput {
        objective: objective.clone(),
        conversation: messages.clone(),
        overlays: serde_json::json!({ "baseTemplate": cfg.context.base_template }),
    };

    let mut stream = match state.mcp.stream(run_input).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "mcp stream failed to start");
            ctx.cancel_pair(state);
            return TurnOutcome::Failed(e.to_string());
        }
    };

    // ── Event loop ───────────────────────────────────────────────────
    while let Some(event) = stream.next().await {
        if state.tasks.is_task_cancelled(task_id) {
            tracing::info!(task_id = %task_id, "cancellation observed, abandoning turn");
            ctx.cancel_pair(state);
            return TurnOutcome::Cancelled;
        }

        let event = match event {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(error = %e, "mcp stream error");
                ctx.cancel_pair(state);
                return TurnOutcome::Failed(e.to_string());
            }
        };

        match event {
            McpEvent::Start { run_id } => {
                state.runs.track(&msg.sender_id, &ctx.key, &run_id);
                ctx.tracked_runs.push(run_id.clone());
                if let Err(e) = state.message_cache.put(&run_id, msg) {
                    tracing::warn!(run_id = %run_id, error = %e, "message cache write failed");
                }
            }

            McpEvent::Judge { need: true } => {}

            McpEvent::Judge { need: false } => {
                // The executor sees no tool work; answer conversationally.
                let reply = match chat_with_retry(state.llm.as_ref(), &messages, &opts, &retry)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "direct reply failed after retries");
                        ctx.cancel_pair(state);
                        return TurnOutcome::Failed(e.to_string());
                    }
                };
                let pair_id = ctx.ensure_pair(state, &objective);
                match deliver(state, ctx, msg, task_id, &reply).await {
                    Delivery::Cancelled => {
                        ctx.cancel_pair(state);
                        return TurnOutcome::Cancelled;
                    }
                    Delivery::Sent | Delivery::Empty => {}
                }
                state.history.append_assistant(&pair_id, &reply);
                ctx.finalize_pair(state);
                return TurnOutcome::Completed;
            }

            McpEvent::Plan { steps } => {
                tracing::info!(steps = steps.len(), "plan received");
            }

            McpEvent::ToolResult { tool, payload } => {
                // Mid-task corrections: new messages since the turn started
                // are surfaced to the model before this round's call.
                let pending_now = state.tasks.pending_count(&msg.sender_id);
                if pending_now > ctx.initial_pending {
                    tracing::info!(
                        sender = %msg.sender_id,
                        new_messages = pending_now - ctx.initial_pending,
                        "dynamic perception: folding queued messages into the run"
                    );
                    if let Some(pending_xml) = context::pending_context_xml(
                        &state.tasks.pending_snapshot(&msg.sender_id),
                    ) {
                        messages.push(sentra_domain::ChatMessage::user(pending_xml));
                    }
                    ctx.initial_pending = pending_now;
                }

                messages.push(sentra_domain::ChatMessage::user(wrap_tool_result(
                    tool.as_deref(),
                    &payload,
                )));

                let reply = match chat_with_retry(state.llm.as_ref(), &messages, &opts, &retry)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "tool-round reply failed after retries");
                        ctx.cancel_pair(state);
                        return TurnOutcome::Failed(e.to_string());
                    }
                };

                let pair_id = ctx.ensure_pair(state, &objective);
                match deliver(state, ctx, msg, task_id, &reply).await {
                    Delivery::Cancelled => {
                        ctx.cancel_pair(state);
                        return TurnOutcome::Cancelled;
                    }
                    Delivery::Sent | Delivery::Empty => {}
                }
                state.history.append_assistant(&pair_id, &reply);
                messages.push(sentra_domain::ChatMessage::assistant(reply));
            }

            McpEvent::Summary { text } => {
                tracing::debug!(summary = ?text, "run summarized");
                ctx.finalize_pair(state);
                return TurnOutcome::Completed;
            }

            McpEvent::Unknown { raw } => {
                tracing::debug!(frame = %raw, "unhandled mcp event");
            }
        }
    }

    // Stream ended without a summary. Whatever was already delivered is
    // real; persist it. A turn that never emitted saves nothing.
    if ctx.has_replied {
        ctx.finalize_pair(state);
    } else {
        ctx.cancel_pair(state);
    }
    TurnOutcome::Completed
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Delivery {
    Sent,
    /// Nothing to send (empty text after a first reply already went out).
    Empty,
    Cancelled,
}

/// Send one reply through the adapter. The first reply of a turn quotes
/// the inciting message; later ones don't. The cancel flag is re-checked
/// at this boundary.
async fn deliver(
    state: &AppState,
    ctx: &mut TurnCtx,
    msg: &IncomingMessage,
    task_id: &Uuid,
    text: &str,
) -> Delivery {
    if state.tasks.is_task_cancelled(task_id) {
        return Delivery::Cancelled;
    }
    if text.is_empty() {
        return Delivery::Empty;
    }

    let quote = if ctx.has_replied || msg.proactive {
        None
    } else {
        Some(msg.message_id.clone())
    };

    let frame = AdapterFrame::SendText {
        request_id: String::new(),
        data: SendText {
            conversation_key: ctx.key.as_str().to_owned(),
            text: truncate_bytes(text, MAX_SEND_TEXT_BYTES),
            quote_message_id: quote,
        },
    };

    if state.port.send_and_wait_result(frame).await.is_none() {
        // Delivery unknown; the adapter may still have relayed it.
        tracing::warn!(key = %ctx.key, "send unacknowledged");
    }
    ctx.has_replied = true;
    Delivery::Sent
}

fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    s[..end].to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History maintenance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// After a saved turn: trim the conversation to its pair budget and, when
/// context memory is on, fold the discarded pairs into the daily digest.
async fn maintain_history(state: AppState, key: ConversationKey) {
    let cfg = state.config.snapshot();

    let discarded = match state.history.trim(&key, cfg.context.max_conversation_pairs) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "history trim failed");
            return;
        }
    };
    if !cfg.context.context_memory_enabled || discarded.is_empty() {
        return;
    }

    let texts: Vec<String> = discarded
        .iter()
        .map(|p| {
            if p.assistant_xml.is_empty() {
                p.user_xml.clone()
            } else {
                format!("{}\n{}", p.user_xml, p.assistant_xml)
            }
        })
        .collect();

    let pending = match state.context_memory.push_discarded(&key, &texts) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "context memory append failed");
            return;
        }
    };
    if pending < cfg.context.context_memory_trigger_discarded_pairs {
        return;
    }

    let batch = match state.context_memory.drain_pending(&key) {
        Ok(b) if !b.is_empty() => b,
        _ => return,
    };

    let prompt = format!(
        "Condense the following discarded conversation fragments into a short \
         third-person memory digest. Keep names, promises, and running topics.\n\n{}",
        batch.join("\n---\n")
    );
    let opts =
        ChatOptions::from_config(&cfg.llm).with_model(cfg.context.context_memory_model.clone());
    match state
        .llm
        .chat(&[sentra_domain::ChatMessage::user(prompt)], &opts)
        .await
    {
        Ok(digest) => {
            let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
            let text = sentra_llm::extract_response(&digest).unwrap_or(digest);
            if let Err(e) = state.context_memory.add_digest(&key, &date, text.trim()) {
                tracing::warn!(key = %key, error = %e, "digest write failed");
            }
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "digest summarization failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_bytes_respects_char_boundaries() {
        assert_eq!(truncate_bytes("hello", 10), "hello");
        assert_eq!(truncate_bytes("hello", 3), "hel");
        // "你" is 3 bytes; a 4-byte cut must not split the second char.
        assert_eq!(truncate_bytes("你好", 4), "你");
    }

    #[test]
    fn outcome_equality() {
        assert_eq!(TurnOutcome::Completed, TurnOutcome::Completed);
        assert_ne!(TurnOutcome::Completed, TurnOutcome::Cancelled);
        assert_eq!(
            TurnOutcome::Failed("x".into()),
            TurnOutcome::Failed("x".into())
        );
    }
}
