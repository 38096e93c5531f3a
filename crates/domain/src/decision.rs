//! Reply-gate decisions and cancellation scopes.

use uuid::Uuid;

/// Outcome of the reply-policy gate for one synthesized bundle.
#[derive(Debug, Clone)]
pub struct ReplyDecision {
    pub need_reply: bool,
    /// True when a mandatory signal fired (mention, address-by-name,
    /// reply-to-bot); mandatory decisions bypass the probability roll.
    pub mandatory: bool,
    /// The rolled probability for this bundle.
    pub probability: f64,
    /// The threshold the roll was compared against.
    pub threshold: f64,
    /// Issued iff `need_reply`; the holder must eventually complete it.
    pub task_id: Option<Uuid>,
}

impl ReplyDecision {
    pub fn skip(probability: f64, threshold: f64) -> Self {
        Self { need_reply: false, mandatory: false, probability, threshold, task_id: None }
    }
}

/// Which runs a cancellation request targets within one
/// `(sender, conversation key)` cell of the run registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelScope {
    /// Cancel every run in the conversation.
    Conversation,
    /// Cancel only runs whose `started_at` (epoch ms) is `≤` the cutoff.
    Cutoff(i64),
}
