//! Emotion analytics client.
//!
//! Two surfaces: the long-horizon analytics block injected into the system
//! prompt, and the per-turn `<sentra-emo>` reading attached to the user
//! message. Any failure degrades to omission; the pipeline never blocks on
//! this service.

use reqwest::Client;

use sentra_domain::config::ConfigHandle;

#[async_trait::async_trait]
pub trait EmotionProvider: Send + Sync {
    /// Long-horizon analytics XML for the system prompt.
    async fn analytics_xml(&self, user_id: &str) -> Option<String>;

    /// Per-turn emotion reading for this message.
    async fn turn_emotion_xml(&self, user_id: &str, text: &str) -> Option<String>;

    /// Feed one message into the analytics. Best-effort.
    async fn record_message(&self, user_id: &str, text: &str);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpEmo {
    client: Client,
    config: ConfigHandle,
}

impl HttpEmo {
    pub fn new(config: ConfigHandle) -> Self {
        Self { client: Client::new(), config }
    }

    fn endpoint(&self, path: &str) -> Option<(String, u64)> {
        let cfg = self.config.snapshot().emo.clone();
        let base = cfg.url?;
        Some((format!("{}{path}", base.trim_end_matches('/')), cfg.timeout_ms))
    }

    async fn get_xml(&self, path: &str) -> Option<String> {
        let (url, timeout_ms) = self.endpoint(path)?;
        let resp = self
            .client
            .get(&url)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            tracing::debug!(url = %url, status = %resp.status(), "emo request failed");
            return None;
        }
        let body = resp.text().await.ok()?;
        let trimmed = body.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }
}

#[async_trait::async_trait]
impl EmotionProvider for HttpEmo {
    async fn analytics_xml(&self, user_id: &str) -> Option<String> {
        self.get_xml(&format!("/users/{user_id}/analytics")).await
    }

    async fn turn_emotion_xml(&self, user_id: &str, text: &str) -> Option<String> {
        let (url, timeout_ms) = self.endpoint(&format!("/users/{user_id}/analyze"))?;
        let resp = self
            .client
            .post(&url)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body = resp.text().await.ok()?;
        let trimmed = body.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }

    async fn record_message(&self, user_id: &str, text: &str) {
        let Some((url, timeout_ms)) = self.endpoint(&format!("/users/{user_id}/messages")) else {
            return;
        };
        let result = self
            .client
            .post(&url)
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "emo record failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Null implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Used when `SENTRA_EMO_URL` is unset (and in tests).
pub struct NullEmo;

#[async_trait::async_trait]
impl EmotionProvider for NullEmo {
    async fn analytics_xml(&self, _user_id: &str) -> Option<String> {
        None
    }

    async fn turn_emotion_xml(&self, _user_id: &str, _text: &str) -> Option<String> {
        None
    }

    async fn record_message(&self, _user_id: &str, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_domain::config::Config;

    #[tokio::test]
    async fn null_emo_omits_everything() {
        let emo = NullEmo;
        assert!(emo.analytics_xml("u1").await.is_none());
        assert!(emo.turn_emotion_xml("u1", "hi").await.is_none());
        emo.record_message("u1", "hi").await;
    }

    #[test]
    fn http_emo_disabled_without_url() {
        let emo = HttpEmo::new(ConfigHandle::new(Config::default()));
        assert!(emo.endpoint("/x").is_none());
    }

    #[test]
    fn http_emo_endpoint_join() {
        let mut cfg = Config::default();
        cfg.emo.url = Some("http://emo:9000/".into());
        cfg.emo.timeout_ms = 1234;
        let emo = HttpEmo::new(ConfigHandle::new(cfg));
        let (url, timeout) = emo.endpoint("/users/u1/analytics").unwrap();
        assert_eq!(url, "http://emo:9000/users/u1/analytics");
        assert_eq!(timeout, 1234);
    }
}
