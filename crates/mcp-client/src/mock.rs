//! Scripted executor for tests.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use sentra_domain::{Error, McpEvent, McpRunInput, Result};

use crate::{EventStream, McpExecutor};

/// Replays scripted event sequences, one per `stream` call, and records
/// every `cancel_run`. Shared via `Arc` so tests can inspect after the run.
#[derive(Default)]
pub struct MockExecutor {
    scripts: Mutex<VecDeque<Vec<McpEvent>>>,
    inputs: Mutex<Vec<McpRunInput>>,
    cancelled: Mutex<Vec<String>>,
    /// When true, every `stream` call fails outright.
    fail_streams: Mutex<bool>,
    /// Delay before each scripted event (simulates slow runs).
    event_delay_ms: Mutex<u64>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the event sequence for the next run.
    pub fn push_script(&self, events: Vec<McpEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Convenience: a run that judges "no reply needed".
    pub fn push_judge_no(&self, run_id: &str) {
        self.push_script(vec![
            McpEvent::Start { run_id: run_id.into() },
            McpEvent::Judge { need: false },
        ]);
    }

    /// Convenience: a run with `n` tool rounds then a summary.
    pub fn push_tool_rounds(&self, run_id: &str, n: usize) {
        let mut events = vec![
            McpEvent::Start { run_id: run_id.into() },
            McpEvent::Judge { need: true },
            McpEvent::Plan { steps: vec!["step".into()] },
        ];
        for i in 0..n {
            events.push(McpEvent::ToolResult {
                tool: Some(format!("tool_{i}")),
                payload: serde_json::json!({"round": i}),
            });
        }
        events.push(McpEvent::Summary { text: Some("done".into()) });
        self.push_script(events);
    }

    pub fn set_fail_streams(&self, fail: bool) {
        *self.fail_streams.lock() = fail;
    }

    pub fn set_event_delay_ms(&self, ms: u64) {
        *self.event_delay_ms.lock() = ms;
    }

    pub fn cancelled_runs(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn run_inputs(&self) -> Vec<McpRunInput> {
        self.inputs.lock().clone()
    }

    pub fn stream_count(&self) -> usize {
        self.inputs.lock().len()
    }
}

#[async_trait::async_trait]
impl McpExecutor for MockExecutor {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn stream(&self, input: McpRunInput) -> Result<EventStream> {
        self.inputs.lock().push(input);
        if *self.fail_streams.lock() {
            return Err(Error::Mcp("scripted stream failure".into()));
        }
        let events = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![McpEvent::Summary { text: None }]);

        let delay_ms = *self.event_delay_ms.lock();
        let stream = async_stream::stream! {
            for event in events {
                // Yield across an await point so consumers observe events
                // as a real stream, not a ready batch.
                if delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                } else {
                    tokio::task::yield_now().await;
                }
                yield Ok::<_, Error>(event);
            }
        };
        Ok(Box::pin(stream))
    }

    async fn cancel_run(&self, run_id: &str) -> Result<()> {
        self.cancelled.lock().push(run_id.to_owned());
        Ok(())
    }
}
