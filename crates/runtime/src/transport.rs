//! Transport port — the single-writer WebSocket link to the IM adapter.
//!
//! Outbound frames funnel through one mpsc channel so concurrent senders
//! never interleave on the socket. Request/result correlation uses a
//! pending map of `requestId → oneshot`; `send_and_wait_result` retries
//! under fresh ids and resolves `None` ("delivery unknown") once attempts
//! are spent — callers proceed rather than block the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use sentra_domain::config::ConfigHandle;
use sentra_domain::{Error, Result};
use sentra_protocol::AdapterFrame;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Port trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait AdapterPort: Send + Sync {
    /// Fire-and-forget delivery (still serialized through the writer).
    async fn send(&self, frame: AdapterFrame) -> Result<()>;

    /// Send a request and wait for the matching `result` frame. `None`
    /// after the configured attempts: delivery unknown, caller proceeds.
    async fn send_and_wait_result(&self, frame: AdapterFrame) -> Option<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WsTransport {
    config: ConfigHandle,
    outbound_tx: mpsc::Sender<AdapterFrame>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
}

impl WsTransport {
    /// Returns the port plus the outbound receiver the connection loop
    /// drains.
    pub fn new(config: ConfigHandle) -> (Arc<Self>, mpsc::Receiver<AdapterFrame>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        (
            Arc::new(Self { config, outbound_tx, pending: Mutex::new(HashMap::new()) }),
            outbound_rx,
        )
    }

    fn register(&self, request_id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.to_owned(), tx);
        rx
    }

    fn unregister(&self, request_id: &str) {
        self.pending.lock().remove(request_id);
    }

    /// Resolve a pending call from an inbound `result` frame. Returns
    /// whether a waiter existed (late results for abandoned attempts don't).
    pub fn resolve_result(&self, request_id: &str, value: Value) -> bool {
        match self.pending.lock().remove(request_id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter (connection lost). Each resolves as `None`.
    pub fn fail_all_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        let n = pending.len();
        pending.clear();
        n
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait::async_trait]
impl AdapterPort for WsTransport {
    async fn send(&self, mut frame: AdapterFrame) -> Result<()> {
        frame.ensure_request_id();
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| Error::Transport("outbound channel closed".into()))
    }

    async fn send_and_wait_result(&self, frame: AdapterFrame) -> Option<Value> {
        let cfg = self.config.snapshot().transport.clone();
        let attempts = cfg.send_rpc_max_retries + 1;
        let timeout = Duration::from_millis(cfg.send_rpc_timeout_ms);

        for attempt in 1..=attempts {
            let mut attempt_frame = frame.clone();
            let request_id = uuid::Uuid::new_v4().to_string();
            attempt_frame.set_request_id(request_id.clone());

            let rx = self.register(&request_id);
            if self.outbound_tx.send(attempt_frame).await.is_err() {
                self.unregister(&request_id);
                return None;
            }

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(value)) => return Some(value),
                Ok(Err(_)) => {
                    // Waiter dropped by fail_all_pending (disconnect).
                    tracing::debug!(attempt, attempts, "rpc waiter dropped, retrying");
                }
                Err(_) => {
                    self.unregister(&request_id);
                    tracing::warn!(attempt, attempts, timeout_ms = cfg.send_rpc_timeout_ms, "rpc attempt timed out");
                }
            }
        }
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maintain the adapter connection: connect, pump frames both ways,
/// reconnect with bounded attempts. Inbound non-`result` frames go to
/// `inbound_tx`; `result` frames resolve pending RPCs in place.
pub async fn run_connection(
    transport: Arc<WsTransport>,
    mut outbound_rx: mpsc::Receiver<AdapterFrame>,
    inbound_tx: mpsc::Sender<AdapterFrame>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut failures: u32 = 0;

    loop {
        let cfg = transport.config.snapshot().transport.clone();
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let url = cfg.ws_url();
        let (mut ws, _) = match connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                failures += 1;
                tracing::warn!(url = %url, attempt = failures, error = %e, "adapter connect failed");
                if failures >= cfg.max_reconnect_attempts {
                    return Err(Error::Transport(format!(
                        "giving up after {failures} connect attempts"
                    )));
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(cfg.reconnect_interval_ms)) => continue,
                }
            }
        };

        failures = 0;
        tracing::info!(url = %url, "adapter connected");

        // Best-effort refresh of derived social state on every (re)connect.
        {
            let transport = transport.clone();
            tokio::spawn(async move {
                let frame = AdapterFrame::RefreshSocialContext { request_id: String::new() };
                if transport.send_and_wait_result(frame).await.is_none() {
                    tracing::debug!("social context refresh unacknowledged");
                }
            });
        }

        let disconnect_reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                outbound = outbound_rx.recv() => {
                    let Some(frame) = outbound else {
                        let _ = ws.close(None).await;
                        return Ok(());
                    };
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping unserializable outbound frame");
                            continue;
                        }
                    };
                    if let Err(e) = ws.send(WsMessage::Text(json)).await {
                        break format!("write failed: {e}");
                    }
                }
                inbound = ws.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_inbound_text(&transport, &inbound_tx, &text).await;
                        }
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                        Some(Ok(WsMessage::Close(_))) | None => break "peer closed".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("read failed: {e}"),
                    }
                }
            }
        };

        let failed = transport.fail_all_pending();
        tracing::warn!(
            reason = %disconnect_reason,
            failed_in_flight = failed,
            "adapter disconnected, reconnecting"
        );
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(
                transport.config.snapshot().transport.reconnect_interval_ms,
            )) => {}
        }
    }
}

async fn handle_inbound_text(
    transport: &Arc<WsTransport>,
    inbound_tx: &mpsc::Sender<AdapterFrame>,
    text: &str,
) {
    let frame = match serde_json::from_str::<AdapterFrame>(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable adapter frame");
            return;
        }
    };

    match frame {
        AdapterFrame::Result { request_id, ok, data } => {
            let value = if data.is_null() {
                serde_json::json!({ "ok": ok })
            } else {
                data
            };
            if !transport.resolve_result(&request_id, value) {
                tracing::debug!(request_id = %request_id, "result for unknown request");
            }
        }
        AdapterFrame::Ping { timestamp } => {
            let _ = transport.send(AdapterFrame::Pong { timestamp }).await;
        }
        other => {
            if inbound_tx.send(other).await.is_err() {
                tracing::warn!("inbound channel closed, dropping frame");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock port (tests)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory port recording every frame; `send_and_wait_result` answers
/// `{"ok": true}` unless scripted otherwise.
#[derive(Default)]
pub struct MockPort {
    sent: Mutex<Vec<AdapterFrame>>,
    scripted: Mutex<std::collections::VecDeque<Option<Value>>>,
}

impl MockPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next `send_and_wait_result` outcome.
    pub fn script_result(&self, result: Option<Value>) {
        self.scripted.lock().push_back(result);
    }

    pub fn sent_frames(&self) -> Vec<AdapterFrame> {
        self.sent.lock().clone()
    }

    /// The delivered reply texts, in send order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|f| match f {
                AdapterFrame::SendText { data, .. } => Some(data.text.clone()),
                _ => None,
            })
            .collect()
    }

    /// The quote markers of delivered replies, in send order.
    pub fn sent_quotes(&self) -> Vec<Option<String>> {
        self.sent
            .lock()
            .iter()
            .filter_map(|f| match f {
                AdapterFrame::SendText { data, .. } => Some(data.quote_message_id.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl AdapterPort for MockPort {
    async fn send(&self, mut frame: AdapterFrame) -> Result<()> {
        frame.ensure_request_id();
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn send_and_wait_result(&self, mut frame: AdapterFrame) -> Option<Value> {
        frame.ensure_request_id();
        self.sent.lock().push(frame);
        self.scripted
            .lock()
            .pop_front()
            .unwrap_or_else(|| Some(serde_json::json!({ "ok": true })))
    }
}
