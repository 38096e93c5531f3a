//! OpenAI-compatible chat completions client.
//!
//! Works with OpenAI and any endpoint following the same contract. The
//! base URL, key, model, and timeout come from [`ChatOptions`] on every call
//! so config reloads apply without rebuilding the client.

use serde_json::Value;

use sentra_domain::{ChatMessage, Error, Result, Role};

use crate::client::{ChatOptions, LlmClient};

pub struct HttpLlmClient {
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new() -> Result<Self> {
        // Connection pooling only; request timeouts are per-call.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client })
    }

    fn chat_url(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn build_body(messages: &[ChatMessage], options: &ChatOptions) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        serde_json::json!({
            "model": options.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let url = Self::chat_url(&options.api_base_url);
        let body = Self::build_body(messages, options);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(std::time::Duration::from_millis(options.timeout_ms))
            .json(&body);
        if let Some(key) = &options.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("llm chat after {}ms", options.timeout_ms))
            } else {
                Error::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("decoding chat response: {e}")))?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(Error::Http(format!("chat completions {status}: {message}")));
        }

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::Llm("chat response has no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_domain::config::LlmConfig;

    #[test]
    fn chat_url_strips_trailing_slash() {
        assert_eq!(
            HttpLlmClient::chat_url("https://api.example.com/v1/"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn body_carries_roles_and_model() {
        let opts = ChatOptions::from_config(&LlmConfig::default()).with_model("m-test");
        let msgs = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("<sentra-response>yo</sentra-response>"),
        ];
        let body = HttpLlmClient::build_body(&msgs, &opts);
        assert_eq!(body["model"], "m-test");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"], "hi");
    }
}
