//! HTTP transport for the MCP executor.
//!
//! Runs are started with `POST {base}/runs`; the response body is a
//! newline-delimited JSON stream, one event per line. Cancellation is
//! `POST {base}/runs/{run_id}/cancel`.

use futures_util::StreamExt;

use sentra_domain::{Error, McpEvent, McpRunInput, Result};

use crate::{EventStream, McpExecutor};

pub struct HttpMcpExecutor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMcpExecutor {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_owned(), client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Decode one NDJSON line into an event. Blank lines yield `None`.
fn decode_line(line: &str) -> Option<McpEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(raw) => Some(McpEvent::from_value(raw)),
        Err(e) => {
            tracing::warn!(error = %e, line = trimmed, "skipping undecodable MCP frame");
            None
        }
    }
}

#[async_trait::async_trait]
impl McpExecutor for HttpMcpExecutor {
    async fn init(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| Error::Mcp(format!("init: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Mcp(format!("init: executor returned {}", resp.status())));
        }
        Ok(())
    }

    async fn stream(&self, input: McpRunInput) -> Result<EventStream> {
        let resp = self
            .client
            .post(self.url("/runs"))
            .json(&input)
            .send()
            .await
            .map_err(|e| Error::Mcp(format!("starting run: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Mcp(format!("starting run: executor returned {}", resp.status())));
        }

        let mut bytes = resp.bytes_stream();
        let stream = async_stream::try_stream! {
            // Carry partial lines across chunk boundaries.
            let mut buf = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| Error::Mcp(format!("run stream: {e}")))?;
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(nl) = buf.find('\n') {
                    let line: String = buf.drain(..=nl).collect();
                    if let Some(event) = decode_line(&line) {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                }
            }
            // Stream ended without a summary; flush any trailing line.
            if let Some(event) = decode_line(&buf) {
                yield event;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn cancel_run(&self, run_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/runs/{run_id}/cancel")))
            .send()
            .await
            .map_err(|e| Error::Mcp(format!("cancel {run_id}: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Mcp(format!(
                "cancel {run_id}: executor returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
