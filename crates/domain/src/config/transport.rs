use serde::{Deserialize, Serialize};

use super::{env_parse, env_string};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter transport configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// WebSocket link to the IM adapter plus RPC retry/timeout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub ws_host: String,
    pub ws_port: u16,
    /// Delay between reconnect attempts.
    pub reconnect_interval_ms: u64,
    /// Give up after this many consecutive failed reconnects.
    pub max_reconnect_attempts: u32,
    /// Attempts for `send_and_wait_result` before resolving `None`.
    pub send_rpc_max_retries: u32,
    /// Per-attempt timeout for `send_and_wait_result`.
    pub send_rpc_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ws_host: "127.0.0.1".into(),
            ws_port: 6700,
            reconnect_interval_ms: 3_000,
            max_reconnect_attempts: 30,
            send_rpc_max_retries: 2,
            send_rpc_timeout_ms: 15_000,
        }
    }
}

impl TransportConfig {
    pub fn from_env(prev: &Self) -> Self {
        Self {
            ws_host: env_string("WS_HOST", &prev.ws_host),
            ws_port: env_parse("WS_PORT", prev.ws_port),
            reconnect_interval_ms: env_parse(
                "WS_RECONNECT_INTERVAL_MS",
                prev.reconnect_interval_ms,
            ),
            max_reconnect_attempts: env_parse(
                "WS_MAX_RECONNECT_ATTEMPTS",
                prev.max_reconnect_attempts,
            ),
            send_rpc_max_retries: env_parse("SEND_RPC_MAX_RETRIES", prev.send_rpc_max_retries),
            send_rpc_timeout_ms: env_parse("SEND_RPC_TIMEOUT_MS", prev.send_rpc_timeout_ms),
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.ws_host, self.ws_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_shape() {
        let cfg = TransportConfig { ws_host: "adapter.local".into(), ws_port: 9001, ..Default::default() };
        assert_eq!(cfg.ws_url(), "ws://adapter.local:9001");
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("WS_PORT", "7700");
        let cfg = TransportConfig::from_env(&TransportConfig::default());
        assert_eq!(cfg.ws_port, 7700);
        std::env::remove_var("WS_PORT");
    }
}
