//! LLM access: a provider-agnostic [`LlmClient`] trait, an OpenAI-compatible
//! HTTP implementation, and the retrying/validating `chat_with_retry` wrapper
//! used for every response-producing call.

pub mod client;
pub mod http;
pub mod mock;
pub mod retry;

pub use client::{ChatOptions, LlmClient};
pub use http::HttpLlmClient;
pub use mock::MockLlm;
pub use retry::{chat_with_retry, estimate_tokens, extract_response, RetryPolicy};
