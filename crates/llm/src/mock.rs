//! Scripted chat client for tests.

use std::collections::VecDeque;

use parking_lot::Mutex;

use sentra_domain::{ChatMessage, Error, Result};

use crate::client::{ChatOptions, LlmClient};

/// Returns queued responses in order and records every call. When the queue
/// runs dry it keeps returning the last scripted entry (or an error if none
/// were scripted).
#[derive(Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<Result<String>>>,
    last: Mutex<Option<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, text: impl Into<String>) {
        self.script.lock().push_back(Ok(text.into()));
    }

    pub fn push_err(&self, err: Error) {
        self.script.lock().push_back(Err(err));
    }

    /// A mock that always answers with one valid wrapped response.
    pub fn always(text: impl Into<String>) -> Self {
        let mock = Self::new();
        *mock.last.lock() = Some(text.into());
        mock
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, messages: &[ChatMessage], _options: &ChatOptions) -> Result<String> {
        self.calls.lock().push(messages.to_vec());

        if let Some(next) = self.script.lock().pop_front() {
            if let Ok(text) = &next {
                *self.last.lock() = Some(text.clone());
            }
            return next;
        }
        self.last
            .lock()
            .clone()
            .ok_or_else(|| Error::Llm("mock script exhausted".into()))
    }
}
