use thiserror::Error;

/// Failure raised by a node handler or by one of the execution layers
/// wrapped around it.
#[derive(Debug, Error)]
pub enum NodeError {
    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Programming error: {0}")]
    Programming(String),

    // Transient infrastructure errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Node '{node_name}' exceeded timeout of {timeout_ms}ms")]
    Timeout { node_name: String, timeout_ms: u64 },

    // Framework-imposed errors
    #[error("Node '{node_name}' cancelled")]
    Cancelled { node_name: String },

    #[error("Circuit open for node '{node_name}', recovery in {recovery_in_ms}ms")]
    CircuitOpen {
        node_name: String,
        recovery_in_ms: u64,
    },

    /// Every attempt failed, or an attempt failed with a non-retryable error.
    /// `errors` is in attempt order; the last entry is the terminal error.
    #[error("Node '{node_name}' failed after {attempts} attempt(s): {}", last_message(.errors))]
    RetryExhausted {
        node_name: String,
        attempts: u32,
        errors: Vec<NodeError>,
    },

    // Foreign errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn last_message(errors: &[NodeError]) -> String {
    errors
        .last()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no error recorded".to_string())
}

impl NodeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn programming(msg: impl Into<String>) -> Self {
        Self::Programming(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Wrap an arbitrary message as an untyped error. Classification falls
    /// back to message pattern matching for these.
    pub fn other(msg: impl std::fmt::Display) -> Self {
        Self::Other(anyhow::anyhow!("{}", msg))
    }

    /// The terminal error behind a retry exhaustion, or `self` otherwise.
    pub fn last_error(&self) -> &NodeError {
        match self {
            Self::RetryExhausted { errors, .. } => match errors.last() {
                Some(last) => last.last_error(),
                None => self,
            },
            other => other,
        }
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}

/// Errors raised while building nodes or loading policy files. These fail
/// at construction time, never during an invocation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Node name is required")]
    MissingName,

    #[error("Invalid retry configuration: {0}")]
    InvalidRetry(String),

    #[error("Invalid circuit breaker configuration: {0}")]
    InvalidCircuitBreaker(String),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Policy file not found: {0}")]
    NotFound(String),

    #[error("Policy parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_reports_last_error() {
        let err = NodeError::RetryExhausted {
            node_name: "seed".into(),
            attempts: 2,
            errors: vec![
                NodeError::network("first"),
                NodeError::network("connection reset"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Node 'seed' failed after 2 attempt(s): Network error: connection reset"
        );
        assert!(matches!(err.last_error(), NodeError::Network(m) if m == "connection reset"));
        assert!(err.is_retry_exhausted());
    }

    #[test]
    fn timeout_message_mentions_timeout() {
        let err = NodeError::Timeout {
            node_name: "attack".into(),
            timeout_ms: 1000,
        };
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn last_error_of_plain_error_is_itself() {
        let err = NodeError::validation("bad field");
        assert!(matches!(err.last_error(), NodeError::Validation(_)));
    }
}
