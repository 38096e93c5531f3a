//! Shared application state passed to every component.

use std::sync::Arc;

use sentra_domain::config::ConfigHandle;
use sentra_llm::LlmClient;
use sentra_mcp::McpExecutor;
use sentra_stores::{
    ContextMemoryStore, DelayQueue, HistoryStore, MessageCache, PersonaStore, RecoveryJournal,
};

use crate::bundler::MessageBundler;
use crate::emo::EmotionProvider;
use crate::gate::{ActiveTaskRegistry, ReplyPolicy};
use crate::overlays::OverlayStore;
use crate::runs::RunRegistry;
use crate::transport::AdapterPort;

/// One struct of interface-typed fields, constructed once at startup and
/// cloned (cheaply, all `Arc`s) into every task.
///
/// Fields are grouped by concern:
/// - **Config** — hot-reloadable snapshot handle
/// - **External collaborators** — LLM, MCP executor, adapter port, emo
/// - **Stores** — history, personas, caches, queues, journals
/// - **Scheduler state** — active tasks, run registry, bundler, policy
#[derive(Clone)]
pub struct AppState {
    // ── Config ────────────────────────────────────────────────────────
    pub config: ConfigHandle,

    // ── External collaborators ────────────────────────────────────────
    pub llm: Arc<dyn LlmClient>,
    pub mcp: Arc<dyn McpExecutor>,
    pub port: Arc<dyn AdapterPort>,
    pub emo: Arc<dyn EmotionProvider>,

    // ── Stores ────────────────────────────────────────────────────────
    pub history: Arc<HistoryStore>,
    pub personas: Arc<PersonaStore>,
    pub message_cache: Arc<MessageCache>,
    pub delay_queue: Arc<DelayQueue>,
    pub journal: Arc<RecoveryJournal>,
    pub context_memory: Arc<ContextMemoryStore>,
    pub overlays: Arc<OverlayStore>,

    // ── Scheduler state ───────────────────────────────────────────────
    pub tasks: Arc<ActiveTaskRegistry>,
    pub runs: Arc<RunRegistry>,
    pub bundler: Arc<MessageBundler>,
    pub policy: Arc<dyn ReplyPolicy>,
}
