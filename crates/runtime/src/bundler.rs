//! Message bundler — coalesces bursts from one sender into a single
//! logical turn.
//!
//! One sleeping task per open bundle, not one timer per message: the window
//! loop sleeps in `window_ms` slices and seals as soon as no message landed
//! in the latest slice or `max_ms` elapsed since the bundle opened. While a
//! bundle is collecting, append always wins; with no open bundle and a busy
//! sender, messages buffer as pending instead (the handler's check order).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sentra_domain::{merge_messages, IncomingMessage};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundle state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Bundle {
    messages: Vec<IncomingMessage>,
    seen_ids: HashSet<String>,
    opened_at: Instant,
    last_updated_at: Instant,
    collecting: bool,
}

impl Bundle {
    fn new(first: IncomingMessage) -> Self {
        let mut seen_ids = HashSet::new();
        if !first.message_id.is_empty() {
            seen_ids.insert(first.message_id.clone());
        }
        let now = Instant::now();
        Self {
            messages: vec![first],
            seen_ids,
            opened_at: now,
            last_updated_at: now,
            collecting: true,
        }
    }
}

/// What `observe` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Appended to the sender's open bundle (or dropped as a duplicate).
    Appended,
    /// A new bundle opened; the caller must start the window loop.
    Opened,
    /// No open bundle and the sender is busy; buffer as pending.
    Busy,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MessageBundler {
    bundles: Mutex<HashMap<String, Bundle>>,
}

impl Default for MessageBundler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBundler {
    pub fn new() -> Self {
        Self { bundles: Mutex::new(HashMap::new()) }
    }

    /// Route one message. `sender_busy` is the active-task check, evaluated
    /// by the caller *after* the open-bundle check loses.
    pub fn observe(&self, msg: IncomingMessage, sender_busy: bool) -> IngestOutcome {
        let sender = msg.sender_id.clone();
        let mut bundles = self.bundles.lock();

        if let Some(bundle) = bundles.get_mut(&sender) {
            if bundle.collecting {
                let dup = !msg.message_id.is_empty()
                    && !bundle.seen_ids.insert(msg.message_id.clone());
                if dup {
                    tracing::debug!(sender, message_id = %msg.message_id, "duplicate message dropped");
                } else {
                    bundle.messages.push(msg);
                }
                bundle.last_updated_at = Instant::now();
                return IngestOutcome::Appended;
            }
        }

        if sender_busy {
            return IngestOutcome::Busy;
        }

        bundles.insert(sender, Bundle::new(msg));
        IngestOutcome::Opened
    }

    pub fn is_collecting(&self, sender: &str) -> bool {
        self.bundles
            .lock()
            .get(sender)
            .map(|b| b.collecting)
            .unwrap_or(false)
    }

    /// Whether the sender's bundle is past its window or max age.
    fn due(&self, sender: &str, window: Duration, max: Duration) -> Option<bool> {
        let bundles = self.bundles.lock();
        let bundle = bundles.get(sender)?;
        let now = Instant::now();
        Some(
            now.duration_since(bundle.last_updated_at) >= window
                || now.duration_since(bundle.opened_at) >= max,
        )
    }

    /// Close the sender's bundle and synthesize the merged message.
    pub fn seal(&self, sender: &str) -> Option<IncomingMessage> {
        let bundle = self.bundles.lock().remove(sender)?;
        merge_messages(&bundle.messages)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ingest + window loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Route an inbound message through the bundler, buffering to pending when
/// the sender is busy and spawning the window loop when a bundle opens.
pub fn ingest(state: &AppState, msg: IncomingMessage) {
    let sender = msg.sender_id.clone();
    let busy = state.tasks.has_task_for_sender(&sender);

    match state.bundler.observe(msg.clone(), busy) {
        IngestOutcome::Appended => {}
        IngestOutcome::Busy => {
            tracing::debug!(sender, "sender busy, buffering message as pending");
            state.tasks.push_pending(&sender, msg);
        }
        IngestOutcome::Opened => {
            let state = state.clone();
            tokio::spawn(async move {
                run_window_loop(state, sender).await;
            });
        }
    }
}

/// Sleep-check loop for one open bundle; seals and dispatches when due.
async fn run_window_loop(state: AppState, sender: String) {
    loop {
        let cfg = state.config.snapshot().bundler;
        let window = Duration::from_millis(cfg.window_ms);
        let max = Duration::from_millis(cfg.max_ms);

        tokio::time::sleep(window).await;

        match state.bundler.due(&sender, window, max) {
            None => return, // sealed elsewhere
            Some(false) => continue,
            Some(true) => break,
        }
    }

    if let Some(merged) = state.bundler.seal(&sender) {
        tracing::debug!(sender, text = %merged.text, "bundle sealed");
        crate::turn::dispatch_bundle(state, merged).await;
    }
}
