use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Category assigned to a node failure. Drives retry decisions and metrics
/// bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Validation,
    Network,
    Programming,
    Cancellation,
    CircuitOpen,
    RateLimit,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::Programming => "programming",
            Self::Cancellation => "cancellation",
            Self::CircuitOpen => "circuit_open",
            Self::RateLimit => "rate_limit",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying a node error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retryable: bool,
}

/// Routing flags the graph engine branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingFlag {
    Proceed,
    Retry,
    Blocked,
    Escalate,
    Skip,
    Complete,
}

/// A structured error recorded into the shared graph state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub node_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub category: ErrorCategory,
    #[serde(default)]
    pub recoverable: bool,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(
        node_id: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
        recoverable: bool,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            message: message.into(),
            code: None,
            category,
            recoverable,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Partial patch to the shared graph state.
///
/// The framework only ever writes `errors`, `warnings` and `routing_flags`.
/// Node-specific output goes into `data` and passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub routing_flags: BTreeMap<RoutingFlag, bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a node-specific field.
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_flag(mut self, flag: RoutingFlag, value: bool) -> Self {
        self.routing_flags.insert(flag, value);
        self
    }

    pub fn with_error(mut self, entry: ErrorEntry) -> Self {
        self.errors.push(entry);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn flag(&self, flag: RoutingFlag) -> Option<bool> {
        self.routing_flags.get(&flag).copied()
    }

    pub fn is_blocked(&self) -> bool {
        self.flag(RoutingFlag::Blocked).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
            && self.warnings.is_empty()
            && self.routing_flags.is_empty()
            && self.data.is_empty()
    }
}

/// Per-invocation run configuration passed through to the handler.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Cooperative cancellation signal, honoured at the next suspension point.
    pub cancel: Option<CancellationToken>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

/// Context created once per top-level node invocation. Never shared between
/// invocations.
#[derive(Debug, Clone)]
pub struct NodeExecutionContext {
    pub run_id: String,
    pub node_name: String,
    pub max_retry_attempts: u32,
    pub started_at: Instant,
}

impl NodeExecutionContext {
    pub fn new(
        run_id: impl Into<String>,
        node_name: impl Into<String>,
        max_retry_attempts: u32,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            node_name: node_name.into(),
            max_retry_attempts,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
