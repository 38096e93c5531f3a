//! Task-recovery scheduler — resumes crashed or unfinished tasks from
//! on-disk journals with bounded retries.
//!
//! One scan task owns the whole flow, so recoveries are single-flight by
//! construction: candidates found in a scan are processed sequentially with
//! a yield between them, and the next scan only starts after the drain
//! finishes.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use sentra_domain::{IncomingMessage, MessageKind};
use sentra_stores::TaskRecoveryRecord;

use crate::state::AppState;
use crate::turn::{self, TurnOutcome};

pub async fn run(state: AppState, shutdown: CancellationToken) {
    loop {
        let cfg = state.config.snapshot().recovery;
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(std::time::Duration::from_millis(cfg.scan_interval_ms)) => {}
        }
        scan_once(&state).await;
    }
}

/// One scan + drain pass.
pub async fn scan_once(state: &AppState) {
    let cfg = state.config.snapshot().recovery;
    let now = chrono::Utc::now();

    for (path, mut record) in state.journal.scan() {
        if record.is_complete {
            state.journal.delete_artifacts(&path);
            continue;
        }
        if record.is_expired(cfg.file_ttl_hours, now) {
            tracing::info!(task_id = %record.task_id, "recovery record expired, deleting");
            state.journal.delete_artifacts(&path);
            continue;
        }
        // Recovery yields to live traffic: a user with an active task keeps
        // their record for the next scan.
        if state.tasks.active_task_count(&conversation_id_of(&record)) > 0 {
            tracing::debug!(task_id = %record.task_id, "user busy, deferring recovery");
            continue;
        }

        attempt_recovery(state, &path, &mut record, cfg.max_failure_attempts).await;
        tokio::task::yield_now().await;
    }
}

fn conversation_id_of(record: &TaskRecoveryRecord) -> String {
    match &record.group_id {
        Some(gid) => format!("group_{gid}_sender_{}", record.user_id),
        None => format!("private_{}", record.user_id),
    }
}

fn root_directive_xml(record: &TaskRecoveryRecord) -> String {
    let mut body = format!(
        "This task was interrupted before completion. Residual work: {}",
        record.residual_summary()
    );
    if !record.promises.is_empty() {
        body.push_str("\nOutstanding promises:\n");
        for promise in &record.promises {
            body.push_str(&format!("- {promise}\n"));
        }
    }
    format!(
        "<sentra-root-directive attempt=\"{}\">{}</sentra-root-directive>",
        record.recovery_count + 1,
        body.trim_end()
    )
}

fn synthetic_message(record: &TaskRecoveryRecord) -> IncomingMessage {
    IncomingMessage {
        kind: if record.group_id.is_some() { MessageKind::Group } else { MessageKind::Private },
        sender_id: record.user_id.clone(),
        sender_name: None,
        group_id: record.group_id.clone(),
        message_id: uuid::Uuid::new_v4().to_string(),
        text: record.residual_summary().to_owned(),
        summary: None,
        at_users: vec![],
        reply_to_bot: false,
        time_str: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        proactive: true,
        recovery_attempt: Some(record.recovery_count + 1),
        disable_pre_reply: true,
        root_directive_xml: Some(root_directive_xml(record)),
    }
}

async fn attempt_recovery(
    state: &AppState,
    path: &Path,
    record: &mut TaskRecoveryRecord,
    max_attempts: u32,
) {
    tracing::info!(
        task_id = %record.task_id,
        attempt = record.recovery_count + 1,
        "attempting task recovery"
    );

    let outcome = turn::run_admitted(state.clone(), synthetic_message(record)).await;
    match outcome {
        TurnOutcome::Completed | TurnOutcome::NoReply => {
            tracing::info!(task_id = %record.task_id, "recovery succeeded");
            state.journal.delete_artifacts(path);
        }
        TurnOutcome::Busy => {
            // Lost the slot between the busy check and admission; the
            // record stays for the next scan.
            tracing::debug!(task_id = %record.task_id, "slot taken, deferring recovery");
        }
        TurnOutcome::Cancelled | TurnOutcome::Failed(_) => {
            let status = match &outcome {
                TurnOutcome::Failed(e) => e.clone(),
                _ => "cancelled".to_owned(),
            };
            state.journal.record_failure(path, record, &status);
            if record.recovery_count >= max_attempts {
                tracing::warn!(
                    task_id = %record.task_id,
                    attempts = record.recovery_count,
                    "recovery attempts exhausted, giving up"
                );
                state.journal.delete_artifacts(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(gid: Option<&str>) -> TaskRecoveryRecord {
        TaskRecoveryRecord {
            task_id: "t1".into(),
            summary: Some("send the files".into()),
            reason: None,
            user_id: "u1".into(),
            group_id: gid.map(str::to_owned),
            is_complete: false,
            recovery_count: 1,
            created_at: Utc::now(),
            expires_at: None,
            last_recovery_at: None,
            last_recovery_status: None,
            promises: vec!["收集资料发给你".into()],
            tool_calls: vec![],
        }
    }

    #[test]
    fn conversation_id_shapes() {
        assert_eq!(conversation_id_of(&record(Some("g1"))), "group_g1_sender_u1");
        assert_eq!(conversation_id_of(&record(None)), "private_u1");
    }

    #[test]
    fn directive_carries_attempt_and_promises() {
        let xml = root_directive_xml(&record(None));
        assert!(xml.starts_with("<sentra-root-directive attempt=\"2\">"));
        assert!(xml.contains("send the files"));
        assert!(xml.contains("收集资料发给你"));
    }

    #[test]
    fn synthetic_message_is_proactive() {
        let msg = synthetic_message(&record(Some("g1")));
        assert!(msg.proactive);
        assert!(msg.disable_pre_reply);
        assert_eq!(msg.recovery_attempt, Some(2));
        assert!(msg.root_directive_xml.is_some());
        assert_eq!(msg.conversation_id(), "group_g1_sender_u1");
    }
}
