//! Client for the external MCP executor: the service that runs the
//! tool-using agent loop and streams `start / judge / plan / tool_result /
//! summary` events back.

pub mod http;
pub mod mock;

use std::pin::Pin;

use futures_core::Stream;

use sentra_domain::{McpEvent, McpRunInput, Result};

pub use http::HttpMcpExecutor;
pub use mock::MockExecutor;

/// A stream of decoded run events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<McpEvent>> + Send>>;

/// The executor seam consumed by the turn pipeline.
#[async_trait::async_trait]
pub trait McpExecutor: Send + Sync {
    /// One-time startup handshake. Idempotent.
    async fn init(&self) -> Result<()>;

    /// Start a run and stream its events until `summary` or stream end.
    async fn stream(&self, input: McpRunInput) -> Result<EventStream>;

    /// Ask the executor to abort a live run. The run's stream is expected to
    /// surface a terminal event afterwards.
    async fn cancel_run(&self, run_id: &str) -> Result<()>;
}
