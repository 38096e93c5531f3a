//! Delayed-job worker — dispatches persistent scheduled follow-ups.
//!
//! One background loop polls the durable queue. Due jobs replay through the
//! normal pipeline as synthesized proactive messages; a busy target defers
//! the job, and jobs that lagged past the configured bound are dropped or
//! retried with backoff per config.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use sentra_domain::{IncomingMessage, MessageKind};
use sentra_stores::DelayedJob;

use crate::state::AppState;
use crate::{now_ms, turn};

/// Payload shape of a delay-queue job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedAction {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// What the bot should say or do, phrased as the objective.
    pub prompt: String,
}

impl DelayedAction {
    /// The synthesized message the pipeline sees.
    pub fn into_message(self) -> IncomingMessage {
        IncomingMessage {
            kind: if self.group_id.is_some() { MessageKind::Group } else { MessageKind::Private },
            sender_id: self.user_id,
            sender_name: None,
            group_id: self.group_id,
            message_id: uuid::Uuid::new_v4().to_string(),
            text: self.prompt,
            summary: None,
            at_users: vec![],
            reply_to_bot: false,
            time_str: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            proactive: true,
            recovery_attempt: None,
            disable_pre_reply: true,
            root_directive_xml: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run(state: AppState, shutdown: CancellationToken) {
    loop {
        let cfg = state.config.snapshot().delay_queue;
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(std::time::Duration::from_millis(cfg.poll_interval_ms)) => {}
        }

        let now = now_ms();
        let due = match state.delay_queue.take_due(now) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "delay queue poll failed");
                continue;
            }
        };

        for job in due {
            dispatch_job(&state, job, now).await;
        }
    }
}

async fn dispatch_job(state: &AppState, job: DelayedJob, now: i64) {
    let cfg = state.config.snapshot().delay_queue;

    let action: DelayedAction = match serde_json::from_value(job.payload.clone()) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(job_id = %job.job_id, error = %e, "dropping undecodable delayed job");
            return;
        }
    };

    // Busy target: defer, bounded by the lag policy.
    if state.tasks.has_task_for_sender(&action.user_id) {
        let lag = now.saturating_sub(job.due_at_ms);
        if lag > cfg.max_lag_ms as i64 {
            if cfg.drop_on_lag {
                tracing::warn!(
                    job_id = %job.job_id,
                    lag_ms = lag,
                    payload = %job.payload,
                    "delayed job exceeded max lag, dropping"
                );
                return;
            }
            // Backoff: double the poll interval per attempt, capped.
            let factor = 1i64 << job.attempts.min(6);
            let due = now + (cfg.poll_interval_ms as i64) * factor;
            if let Err(e) = state.delay_queue.requeue(job, due) {
                tracing::warn!(error = %e, "delayed job requeue failed");
            }
            return;
        }
        tracing::debug!(job_id = %job.job_id, user = %action.user_id, "target busy, deferring job");
        let due = now + cfg.poll_interval_ms as i64;
        if let Err(e) = state.delay_queue.requeue(job, due) {
            tracing::warn!(error = %e, "delayed job requeue failed");
        }
        return;
    }

    tracing::info!(job_id = %job.job_id, user = %action.user_id, "dispatching delayed job");
    turn::dispatch_bundle(state.clone(), action.into_message()).await;
}
