//! Socket handlers — dispatch for inbound adapter frames.
//!
//! Per inbound chat message, in order: persona/emotion updates fire and
//! forget, intervention detection may cancel stale work, then the message
//! routes through the bundler (append wins while a bundle is open; busy
//! senders buffer as pending; otherwise a new bundle opens).

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sentra_domain::{ChatMessage, IncomingMessage};
use sentra_llm::ChatOptions;
use sentra_protocol::AdapterFrame;

use crate::state::AppState;
use crate::{bundler, intervention};

/// Drain the inbound frame channel until it closes or shutdown fires.
pub async fn run_handler_loop(
    state: AppState,
    mut inbound_rx: mpsc::Receiver<AdapterFrame>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = inbound_rx.recv() => {
                let Some(frame) = frame else { return };
                handle_frame(&state, frame, &shutdown).await;
            }
        }
    }
}

pub async fn handle_frame(state: &AppState, frame: AdapterFrame, shutdown: &CancellationToken) {
    match frame {
        AdapterFrame::Welcome { adapter_version } => {
            tracing::info!(version = ?adapter_version, "adapter welcome");
        }
        AdapterFrame::Ping { timestamp } => {
            let _ = state.port.send(AdapterFrame::Pong { timestamp }).await;
        }
        AdapterFrame::Pong { .. } => {}
        AdapterFrame::Shutdown { reason } => {
            tracing::warn!(reason = ?reason, "adapter requested shutdown");
            shutdown.cancel();
        }
        AdapterFrame::Result { request_id, .. } => {
            // Normally consumed by the transport; reaching here means no
            // waiter existed.
            tracing::debug!(request_id = %request_id, "stray result frame");
        }
        AdapterFrame::Message { data } => handle_message(state, data).await,
        AdapterFrame::SendText { .. } | AdapterFrame::RefreshSocialContext { .. } => {
            tracing::debug!("outbound-only frame received inbound, ignoring");
        }
    }
}

async fn handle_message(state: &AppState, msg: IncomingMessage) {
    tracing::debug!(
        sender = %msg.sender_id,
        message_id = %msg.message_id,
        text = %msg.text,
        "message received"
    );

    // ── Persona & emotion updates (fire-and-forget) ──────────────────
    if !msg.proactive {
        let cfg = state.config.snapshot();
        match state
            .personas
            .record_sample(&msg.sender_id, msg.effective_text(), &cfg.persona)
        {
            Ok(true) => {
                let state2 = state.clone();
                let user = msg.sender_id.clone();
                tokio::spawn(async move {
                    refresh_persona(state2, user).await;
                });
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "persona sample failed"),
        }

        let emo = state.emo.clone();
        let user = msg.sender_id.clone();
        let text = msg.text.clone();
        tokio::spawn(async move {
            emo.record_message(&user, &text).await;
        });
    }

    // ── Intervention ("change of mind") ──────────────────────────────
    if !msg.proactive && intervention::handle_intervention(state, &msg).await {
        tracing::debug!(sender = %msg.sender_id, "intervention fired, message continues normally");
    }

    // ── Bundling / pending / admission ───────────────────────────────
    bundler::ingest(state, msg);
}

/// Re-derive a user's persona from their recent samples.
async fn refresh_persona(state: AppState, user_id: String) {
    let samples = match state.personas.samples(&user_id) {
        Ok(s) if !s.is_empty() => s,
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(user = %user_id, error = %e, "persona samples unreadable");
            return;
        }
    };

    let cfg = state.config.snapshot();
    let opts = ChatOptions::from_config(&cfg.llm);
    let prompt = format!(
        "Derive a concise third-person persona sketch of this chat user from \
         their recent messages. Output a single <sentra-persona> XML block \
         covering tone, interests, and quirks.\n\n{}",
        samples.join("\n")
    );

    match state.llm.chat(&[ChatMessage::user(prompt)], &opts).await {
        Ok(xml) => {
            let trimmed = xml.trim();
            if let Err(e) = state.personas.set_persona_xml(&user_id, trimmed) {
                tracing::warn!(user = %user_id, error = %e, "persona write failed");
            } else {
                tracing::debug!(user = %user_id, "persona refreshed");
            }
        }
        Err(e) => tracing::debug!(user = %user_id, error = %e, "persona derivation failed"),
    }
}
