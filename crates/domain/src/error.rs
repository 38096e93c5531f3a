/// Shared error type used across all Sentra crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("LLM: {0}")]
    Llm(String),

    #[error("MCP: {0}")]
    Mcp(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the failed operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let e = Error::Http("502 bad gateway".into());
        assert_eq!(e.to_string(), "HTTP: 502 bad gateway");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout("llm".into()).is_transient());
        assert!(Error::Http("reset".into()).is_transient());
        assert!(!Error::Config("bad key".into()).is_transient());
        assert!(!Error::Llm("format".into()).is_transient());
    }

    #[test]
    fn from_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e: Error = parse_err.into();
        assert!(matches!(e, Error::Json(_)));
    }
}
