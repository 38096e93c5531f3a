//! Reply-policy gate and active-task admission.
//!
//! One non-cancelled active task per conversation id at any time. Messages
//! arriving while the slot is held buffer as pending and are merged into a
//! single bundle when the slot frees. Cancellation flags are monotonic: once
//! a task id is flagged, `is_task_cancelled` stays true until the pipeline
//! clears it during cleanup.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

use sentra_domain::config::ReplyConfig;
use sentra_domain::{merge_messages, IncomingMessage, MessageKind, ReplyDecision};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the pluggable policy decides before admission.
#[derive(Debug, Clone, Copy)]
pub struct PolicyVerdict {
    pub mandatory: bool,
    /// Rolled desire score in `[0, 1)`.
    pub probability: f64,
    pub threshold: f64,
}

impl PolicyVerdict {
    pub fn need_reply(&self) -> bool {
        self.mandatory || self.probability >= self.threshold
    }
}

/// The pluggable reply policy seam.
pub trait ReplyPolicy: Send + Sync {
    fn evaluate(&self, msg: &IncomingMessage, cfg: &ReplyConfig) -> PolicyVerdict;
}

/// Default policy: mandatory on direct mention, address-by-name, reply-to-bot,
/// private chat (configurable), or synthetic proactive messages; otherwise a
/// probability roll against the base threshold.
pub struct DefaultReplyPolicy;

impl ReplyPolicy for DefaultReplyPolicy {
    fn evaluate(&self, msg: &IncomingMessage, cfg: &ReplyConfig) -> PolicyVerdict {
        let mentioned =
            !cfg.bot_id.is_empty() && msg.at_users.iter().any(|u| u == &cfg.bot_id);
        let named = cfg
            .bot_names
            .iter()
            .any(|name| !name.is_empty() && msg.text.contains(name.as_str()));
        let private = msg.kind == MessageKind::Private && cfg.private_always_reply;

        let mandatory = msg.proactive || mentioned || named || msg.reply_to_bot || private;
        let probability = rand::thread_rng().gen_range(0.0..1.0);

        PolicyVerdict { mandatory, probability, threshold: cfg.base_threshold }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Active tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub task_id: Uuid,
    pub conversation_id: String,
    pub sender: String,
    pub started_at: DateTime<Utc>,
    pub cancelled: bool,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, ActiveTask>,
    /// conversation id → the task currently holding the slot.
    by_conversation: HashMap<String, Uuid>,
    /// Monotonic cancellation flags, cleared only by `clear_cancelled_task`.
    cancelled: HashSet<Uuid>,
    /// sender → FIFO of messages that arrived while the slot was held.
    pending: HashMap<String, Vec<IncomingMessage>>,
}

pub struct ActiveTaskRegistry {
    inner: Mutex<Inner>,
}

impl Default for ActiveTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveTaskRegistry {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// Gate + admission in one step. On `need_reply` the slot is taken and
    /// a task id issued; the caller must eventually call [`complete_task`]
    /// with it, even on failure. When the slot is already held the message
    /// buffers as pending and the decision degrades to skip.
    ///
    /// [`complete_task`]: Self::complete_task
    pub fn should_reply(
        &self,
        msg: &IncomingMessage,
        policy: &dyn ReplyPolicy,
        cfg: &ReplyConfig,
    ) -> ReplyDecision {
        let verdict = policy.evaluate(msg, cfg);
        if !verdict.need_reply() {
            return ReplyDecision::skip(verdict.probability, verdict.threshold);
        }

        match self.try_begin_task(msg) {
            Some(task_id) => ReplyDecision {
                need_reply: true,
                mandatory: verdict.mandatory,
                probability: verdict.probability,
                threshold: verdict.threshold,
                task_id: Some(task_id),
            },
            None => {
                // Slot race: someone took it between gate and admission.
                self.push_pending(&msg.sender_id, msg.clone());
                ReplyDecision::skip(verdict.probability, verdict.threshold)
            }
        }
    }

    /// Take the conversation slot. `None` when a non-cancelled task already
    /// holds it.
    pub fn try_begin_task(&self, msg: &IncomingMessage) -> Option<Uuid> {
        let conversation_id = msg.conversation_id();
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.by_conversation.get(&conversation_id) {
            let blocked = inner
                .tasks
                .get(existing)
                .map(|t| !t.cancelled)
                .unwrap_or(false);
            if blocked {
                return None;
            }
        }

        let task = ActiveTask {
            task_id: Uuid::new_v4(),
            conversation_id: conversation_id.clone(),
            sender: msg.sender_id.clone(),
            started_at: Utc::now(),
            cancelled: false,
        };
        let task_id = task.task_id;
        inner.by_conversation.insert(conversation_id, task_id);
        inner.tasks.insert(task_id, task);
        Some(task_id)
    }

    /// Non-cancelled tasks holding this conversation's slot (0 or 1).
    pub fn active_task_count(&self, conversation_id: &str) -> usize {
        let inner = self.inner.lock();
        inner
            .by_conversation
            .get(conversation_id)
            .and_then(|id| inner.tasks.get(id))
            .map(|t| usize::from(!t.cancelled))
            .unwrap_or(0)
    }

    /// Whether any task (cancelled or not) is still registered for this
    /// sender. Pending buffering keys off this.
    pub fn has_task_for_sender(&self, sender: &str) -> bool {
        self.inner.lock().tasks.values().any(|t| t.sender == sender)
    }

    pub fn push_pending(&self, sender: &str, msg: IncomingMessage) {
        self.inner
            .lock()
            .pending
            .entry(sender.to_owned())
            .or_default()
            .push(msg);
    }

    pub fn pending_count(&self, sender: &str) -> usize {
        self.inner.lock().pending.get(sender).map(Vec::len).unwrap_or(0)
    }

    /// Peek at the pending buffer without draining (dynamic perception).
    pub fn pending_snapshot(&self, sender: &str) -> Vec<IncomingMessage> {
        self.inner.lock().pending.get(sender).cloned().unwrap_or_default()
    }

    /// Release the slot. Returns the sender's buffered messages merged into
    /// one bundle, if any arrived while the task ran.
    pub fn complete_task(&self, sender: &str, task_id: &Uuid) -> Option<IncomingMessage> {
        let mut inner = self.inner.lock();
        if let Some(task) = inner.tasks.remove(task_id) {
            if inner.by_conversation.get(&task.conversation_id) == Some(task_id) {
                inner.by_conversation.remove(&task.conversation_id);
            }
        }
        let drained = inner.pending.remove(sender)?;
        merge_messages(&drained)
    }

    /// Flag every task of this sender as cancelled. The flags persist past
    /// task completion until explicitly cleared.
    pub fn mark_tasks_cancelled_for_sender(&self, sender: &str) -> usize {
        let mut inner = self.inner.lock();
        let ids: Vec<Uuid> = inner
            .tasks
            .values()
            .filter(|t| t.sender == sender && !t.cancelled)
            .map(|t| t.task_id)
            .collect();
        for id in &ids {
            if let Some(task) = inner.tasks.get_mut(id) {
                task.cancelled = true;
            }
            inner.cancelled.insert(*id);
        }
        ids.len()
    }

    pub fn is_task_cancelled(&self, task_id: &Uuid) -> bool {
        self.inner.lock().cancelled.contains(task_id)
    }

    pub fn clear_cancelled_task(&self, task_id: &Uuid) {
        self.inner.lock().cancelled.remove(task_id);
    }
}
