//! Validated chat with bounded retries.
//!
//! Every response-producing LLM call goes through [`chat_with_retry`]:
//! the raw completion must contain a `<sentra-response>` block, must not
//! echo any read-only context tag, and the extracted text must fit the
//! response token budget. Format violations, token overruns, and transport
//! failures all count as transient and burn one retry with a 1 s gap.

use std::time::Duration;

use sentra_domain::{ChatMessage, Error, Result};

use crate::client::{ChatOptions, LlmClient};

/// Context tags the model may read but must never emit back.
const FORBIDDEN_TAGS: &[&str] = &[
    "<sentra-user-question",
    "<sentra-result",
    "<sentra-emo",
    "<sentra-root-directive",
];

const RETRY_GAP: Duration = Duration::from_secs(1);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = retries + 1).
    pub max_retries: u32,
    /// Token budget for the extracted reply.
    pub max_response_tokens: u32,
    /// When false, a missing `<sentra-response>` tag logs and passes the
    /// trimmed raw text through instead of failing the attempt.
    pub strict: bool,
}

impl RetryPolicy {
    pub fn from_config(cfg: &sentra_domain::config::LlmConfig) -> Self {
        Self {
            max_retries: cfg.max_response_retries,
            max_response_tokens: cfg.max_response_tokens,
            strict: cfg.strict_format_check,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract the text inside the first `<sentra-response>…</sentra-response>`
/// block. Returns `None` when the tag pair is absent.
pub fn extract_response(raw: &str) -> Option<String> {
    let open = raw.find("<sentra-response>")?;
    let after = open + "<sentra-response>".len();
    let close = raw[after..].find("</sentra-response>")?;
    Some(raw[after..after + close].trim().to_owned())
}

/// Approximate token count: one token per CJK character (Han, kana, hangul,
/// CJK punctuation), one per four other characters. Over-counts slightly,
/// which only makes the budget check conservative.
pub fn estimate_tokens(text: &str) -> u32 {
    let mut cjk = 0u32;
    let mut other = 0u32;
    for ch in text.chars() {
        let cp = ch as u32;
        let is_cjk = matches!(cp,
            0x3000..=0x303F    // CJK punctuation
            | 0x3040..=0x30FF  // kana
            | 0x3400..=0x4DBF  // CJK ext A
            | 0x4E00..=0x9FFF  // CJK unified
            | 0xAC00..=0xD7AF  // hangul
            | 0xF900..=0xFAFF  // compat ideographs
            | 0xFF00..=0xFFEF  // full-width forms
        );
        if is_cjk {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    cjk + other.div_ceil(4)
}

fn validate(raw: &str, policy: &RetryPolicy) -> Result<String> {
    for tag in FORBIDDEN_TAGS {
        if raw.contains(tag) {
            return Err(Error::Llm(format!("response echoes read-only tag {tag}>")));
        }
    }

    let text = match extract_response(raw) {
        Some(t) => t,
        None if policy.strict => {
            return Err(Error::Llm("response is missing <sentra-response>".into()))
        }
        None => {
            tracing::debug!("response missing <sentra-response>, passing raw text through");
            raw.trim().to_owned()
        }
    };

    if text.is_empty() {
        return Err(Error::Llm("response is empty".into()));
    }

    let tokens = estimate_tokens(&text);
    if tokens > policy.max_response_tokens {
        return Err(Error::Llm(format!(
            "response over budget: ~{tokens} tokens > {}",
            policy.max_response_tokens
        )));
    }

    Ok(text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// chat_with_retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chat, validate, retry. Returns the extracted reply text, or the last
/// error once `max_retries` retries are spent.
pub async fn chat_with_retry(
    client: &dyn LlmClient,
    messages: &[ChatMessage],
    options: &ChatOptions,
    policy: &RetryPolicy,
) -> Result<String> {
    let attempts = policy.max_retries + 1;
    let mut last_err = None;

    for attempt in 1..=attempts {
        match client.chat(messages, options).await {
            Ok(raw) => match validate(&raw, policy) {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "response failed validation");
                    last_err = Some(e);
                }
            },
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "chat call failed");
                last_err = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(RETRY_GAP).await;
        }
    }

    Err(last_err.unwrap_or_else(|| Error::Llm("no attempts made".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLlm;
    use sentra_domain::config::LlmConfig;

    fn policy() -> RetryPolicy {
        RetryPolicy { max_retries: 2, max_response_tokens: 100, strict: true }
    }

    fn opts() -> ChatOptions {
        ChatOptions::from_config(&LlmConfig::default())
    }

    // ── extract_response ───────────────────────────────────────────

    #[test]
    fn extract_plain() {
        let raw = "noise <sentra-response> hi there </sentra-response> tail";
        assert_eq!(extract_response(raw).as_deref(), Some("hi there"));
    }

    #[test]
    fn extract_missing_tag() {
        assert!(extract_response("no tags here").is_none());
        assert!(extract_response("<sentra-response> unterminated").is_none());
    }

    #[test]
    fn extract_first_block_only() {
        let raw = "<sentra-response>a</sentra-response><sentra-response>b</sentra-response>";
        assert_eq!(extract_response(raw).as_deref(), Some("a"));
    }

    // ── estimate_tokens ────────────────────────────────────────────

    #[test]
    fn tokens_ascii() {
        // 8 ascii chars -> 2 tokens
        assert_eq!(estimate_tokens("hi there"), 2);
    }

    #[test]
    fn tokens_cjk_count_per_char() {
        assert_eq!(estimate_tokens("你好啊"), 3);
    }

    #[test]
    fn tokens_mixed() {
        // 2 CJK + 4 ascii -> 2 + 1
        assert_eq!(estimate_tokens("你好 ok!"), 2 + 1);
    }

    // ── validate ───────────────────────────────────────────────────

    #[test]
    fn validate_rejects_forbidden_tag() {
        let raw = "<sentra-response>hi</sentra-response><sentra-result>x</sentra-result>";
        assert!(validate(raw, &policy()).is_err());
    }

    #[test]
    fn validate_rejects_over_budget() {
        let long = "字".repeat(101);
        let raw = format!("<sentra-response>{long}</sentra-response>");
        assert!(validate(&raw, &policy()).is_err());
    }

    #[test]
    fn validate_lenient_passes_raw() {
        let lenient = RetryPolicy { strict: false, ..policy() };
        let out = validate("just text", &lenient).unwrap();
        assert_eq!(out, "just text");
    }

    #[test]
    fn validate_rejects_empty_body() {
        assert!(validate("<sentra-response>  </sentra-response>", &policy()).is_err());
    }

    // ── chat_with_retry ────────────────────────────────────────────

    #[tokio::test]
    async fn retries_until_valid_format() {
        let mock = MockLlm::new();
        mock.push_ok("bare text, no tag");
        mock.push_ok("still no tag");
        mock.push_ok("<sentra-response>ok</sentra-response>");

        let out = chat_with_retry(&mock, &[ChatMessage::user("q")], &opts(), &policy())
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let mock = MockLlm::new();
        mock.push_ok("no tag 1");
        mock.push_ok("no tag 2");
        mock.push_ok("no tag 3");

        let err = chat_with_retry(&mock, &[ChatMessage::user("q")], &opts(), &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
        assert_eq!(mock.call_count(), 3, "max_retries=2 means exactly 3 attempts");
    }

    #[tokio::test]
    async fn network_failures_also_burn_retries() {
        let mock = MockLlm::new();
        mock.push_err(Error::Http("connection reset".into()));
        mock.push_ok("<sentra-response>recovered</sentra-response>");

        let out = chat_with_retry(&mock, &[ChatMessage::user("q")], &opts(), &policy())
            .await
            .unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(mock.call_count(), 2);
    }
}
