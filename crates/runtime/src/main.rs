//! sentra-agent binary: wire the collaborators together and run until the
//! adapter says shutdown or ctrl-c fires.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sentra_domain::config::{Config, ConfigHandle};
use sentra_llm::HttpLlmClient;
use sentra_mcp::{HttpMcpExecutor, McpExecutor};
use sentra_runtime::bundler::MessageBundler;
use sentra_runtime::emo::{HttpEmo, NullEmo};
use sentra_runtime::gate::{ActiveTaskRegistry, DefaultReplyPolicy};
use sentra_runtime::overlays::OverlayStore;
use sentra_runtime::runs::RunRegistry;
use sentra_runtime::transport::WsTransport;
use sentra_runtime::{delay_worker, handlers, recovery, transport, AppState};
use sentra_stores::{
    ContextMemoryStore, DelayQueue, HistoryStore, MessageCache, PersonaStore, RecoveryJournal,
};

/// How often the env snapshot is refreshed.
const CONFIG_REFRESH_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(name = "sentra-agent", about = "Conversational agent runtime")]
struct Cli {
    /// Root directory for all persistent state.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// MCP executor base URL (overrides MCP_BASE_URL).
    #[arg(long)]
    mcp_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ConfigHandle::new(Config::from_env());
    let shutdown = CancellationToken::new();

    // ── Stores ───────────────────────────────────────────────────────
    let data = &cli.data_dir;
    let history = Arc::new(HistoryStore::new(&data.join("history")).context("history store")?);
    let personas = Arc::new(PersonaStore::new(&data.join("personas")).context("persona store")?);
    let message_cache =
        Arc::new(MessageCache::new(&data.join("messageCache")).context("message cache")?);
    let delay_queue = Arc::new(DelayQueue::new(&data.join("delayQueue")).context("delay queue")?);
    let journal =
        Arc::new(RecoveryJournal::new(&data.join("taskData")).context("recovery journal")?);
    let context_memory =
        Arc::new(ContextMemoryStore::new(&data.join("contextMemory")).context("context memory")?);
    let overlays = Arc::new(OverlayStore::new(&data.join("overlays")).context("overlays")?);

    // ── External collaborators ───────────────────────────────────────
    let llm = Arc::new(HttpLlmClient::new().context("llm client")?);

    let mcp_url = cli
        .mcp_url
        .or_else(|| std::env::var("MCP_BASE_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:9300".to_owned());
    let mcp: Arc<dyn McpExecutor> =
        Arc::new(HttpMcpExecutor::new(&mcp_url).context("mcp executor")?);
    if let Err(e) = mcp.init().await {
        tracing::warn!(error = %e, "mcp executor init failed, continuing");
    }

    let emo: Arc<dyn sentra_runtime::emo::EmotionProvider> =
        if config.snapshot().emo.enabled() {
            Arc::new(HttpEmo::new(config.clone()))
        } else {
            Arc::new(NullEmo)
        };

    let (port, outbound_rx) = WsTransport::new(config.clone());

    // ── State ────────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        llm,
        mcp,
        port: port.clone(),
        emo,
        history,
        personas,
        message_cache,
        delay_queue,
        journal,
        context_memory,
        overlays,
        tasks: Arc::new(ActiveTaskRegistry::new()),
        runs: Arc::new(RunRegistry::new()),
        bundler: Arc::new(MessageBundler::new()),
        policy: Arc::new(DefaultReplyPolicy),
    };

    // ── Background loops ─────────────────────────────────────────────
    let (inbound_tx, inbound_rx) = mpsc::channel(256);

    let conn = tokio::spawn(transport::run_connection(
        port,
        outbound_rx,
        inbound_tx,
        shutdown.clone(),
    ));
    tokio::spawn(handlers::run_handler_loop(
        state.clone(),
        inbound_rx,
        shutdown.clone(),
    ));
    tokio::spawn(delay_worker::run(state.clone(), shutdown.clone()));
    tokio::spawn(recovery::run(state.clone(), shutdown.clone()));

    // Env refresh: keep the snapshot current without restarts.
    {
        let config = config.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(CONFIG_REFRESH_SECS)) => {
                        config.reload_from_env();
                    }
                }
            }
        });
    }

    tracing::info!(data_dir = %cli.data_dir.display(), mcp = %mcp_url, "sentra-agent running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
        result = conn => {
            match result {
                Ok(Ok(())) => tracing::info!("adapter connection closed"),
                Ok(Err(e)) => tracing::error!(error = %e, "adapter connection gave up"),
                Err(e) => tracing::error!(error = %e, "connection task panicked"),
            }
            shutdown.cancel();
        }
    }

    // In-flight turns drain on their own; give them a moment.
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    Ok(())
}
