//! Context assembler — builds the `[system, history…, user]` message list
//! for one turn.
//!
//! This is the single point that enforces "no empty fields": every
//! collaborator that fails or has nothing to say degrades to omission, so
//! the prompt never carries empty XML sections.

use sentra_domain::{ChatMessage, ConversationKey, IncomingMessage};

use crate::state::AppState;

/// Everything the turn pipeline needs, built once before the run starts.
pub struct AssembledContext {
    /// `[system, history pairs…, user question]` in protocol form.
    pub messages: Vec<ChatMessage>,
    /// The user-side question XML, doubling as the MCP run objective.
    pub objective: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// XML wrapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn wrap_user_question(msg: &IncomingMessage) -> String {
    let sender = msg
        .sender_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(&msg.sender_id);
    format!(
        "<sentra-user-question sender=\"{}\" time=\"{}\">{}</sentra-user-question>",
        sender, msg.time_str, msg.text
    )
}

/// The messages that piled up while a task ran, rendered so the model can
/// notice mid-task corrections.
pub fn pending_context_xml(pending: &[IncomingMessage]) -> Option<String> {
    if pending.is_empty() {
        return None;
    }
    let body: Vec<String> = pending
        .iter()
        .map(|m| format!("<msg time=\"{}\">{}</msg>", m.time_str, m.effective_text()))
        .collect();
    Some(format!(
        "<sentra-pending-messages>\n{}\n</sentra-pending-messages>",
        body.join("\n")
    ))
}

/// Fold a tool result into user-side content for the next model call.
pub fn wrap_tool_result(tool: Option<&str>, payload: &serde_json::Value) -> String {
    let rendered = match payload {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    match tool {
        Some(name) => format!("<sentra-result tool=\"{name}\">{rendered}</sentra-result>"),
        None => format!("<sentra-result>{rendered}</sentra-result>"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn assemble(
    state: &AppState,
    msg: &IncomingMessage,
    key: &ConversationKey,
) -> AssembledContext {
    let cfg = state.config.snapshot();

    // ── System prompt ────────────────────────────────────────────────
    let mut system_parts: Vec<String> =
        vec![state.overlays.base_template(&cfg.context.base_template)];

    if let Ok(Some(persona)) = state.personas.persona_xml(&msg.sender_id) {
        system_parts.push(persona);
    }
    if let Some(analytics) = state.emo.analytics_xml(&msg.sender_id).await {
        system_parts.push(analytics);
    }
    let overlays = state.overlays.snapshot();
    if let Some(worldbook) = &overlays.worldbook_xml {
        system_parts.push(worldbook.clone());
    }
    if let Some(preset) = &overlays.preset_xml {
        system_parts.push(preset.clone());
    }
    if cfg.context.context_memory_enabled {
        if let Ok(Some(memory)) = state.context_memory.render_xml(key) {
            system_parts.push(memory);
        }
    }

    let mut messages = vec![ChatMessage::system(system_parts.join("\n\n"))];

    // ── History ──────────────────────────────────────────────────────
    match state.history.recent_pairs(key, cfg.context.mcp_max_context_pairs) {
        Ok(pairs) => {
            for pair in pairs {
                messages.push(ChatMessage::user(pair.user_xml));
                if !pair.assistant_xml.is_empty() {
                    messages.push(ChatMessage::assistant(pair.assistant_xml));
                }
            }
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "history unavailable, proceeding without");
        }
    }

    // ── User message ─────────────────────────────────────────────────
    let mut user_parts = Vec::new();
    if let Some(directive) = &msg.root_directive_xml {
        user_parts.push(directive.clone());
    }
    if let Some(pending) = pending_context_xml(&state.tasks.pending_snapshot(&msg.sender_id)) {
        user_parts.push(pending);
    }
    if let Some(emo) = state.emo.turn_emotion_xml(&msg.sender_id, &msg.text).await {
        user_parts.push(format!("<sentra-emo>{emo}</sentra-emo>"));
    }
    let question = wrap_user_question(msg);
    user_parts.push(question.clone());

    messages.push(ChatMessage::user(user_parts.join("\n")));

    AssembledContext { messages, objective: question }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_domain::MessageKind;

    fn msg(text: &str) -> IncomingMessage {
        IncomingMessage {
            kind: MessageKind::Group,
            sender_id: "u1".into(),
            sender_name: Some("Ada".into()),
            group_id: Some("g1".into()),
            message_id: "m1".into(),
            text: text.into(),
            summary: None,
            at_users: vec![],
            reply_to_bot: false,
            time_str: "2024-06-15 10:00:00".into(),
            proactive: false,
            recovery_attempt: None,
            disable_pre_reply: false,
            root_directive_xml: None,
        }
    }

    #[test]
    fn question_uses_sender_name_when_present() {
        let xml = wrap_user_question(&msg("hello"));
        assert!(xml.starts_with("<sentra-user-question sender=\"Ada\""));
        assert!(xml.contains(">hello</sentra-user-question>"));
    }

    #[test]
    fn question_falls_back_to_sender_id() {
        let mut m = msg("hi");
        m.sender_name = None;
        assert!(wrap_user_question(&m).contains("sender=\"u1\""));
    }

    #[test]
    fn pending_xml_empty_is_none() {
        assert!(pending_context_xml(&[]).is_none());
    }

    #[test]
    fn pending_xml_lists_messages_in_order() {
        let pending = vec![msg("first"), msg("second")];
        let xml = pending_context_xml(&pending).unwrap();
        let a = xml.find("first").unwrap();
        let b = xml.find("second").unwrap();
        assert!(a < b);
        assert!(xml.starts_with("<sentra-pending-messages>"));
    }

    #[test]
    fn tool_result_wrapping() {
        let xml = wrap_tool_result(Some("search"), &serde_json::json!({"hits": 2}));
        assert_eq!(xml, "<sentra-result tool=\"search\">{\"hits\":2}</sentra-result>");

        let plain = wrap_tool_result(None, &serde_json::json!("already text"));
        assert_eq!(plain, "<sentra-result>already text</sentra-result>");
    }
}
