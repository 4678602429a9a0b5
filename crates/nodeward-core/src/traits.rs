use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::{NodeError, Result};
use crate::types::{ErrorCategory, RunConfig, StateUpdate};

/// Node body: maps the current state to a partial state update.
///
/// Handlers may be invoked more than once per invocation when retries are
/// configured. The framework makes no idempotency guarantees; a handler that
/// performs side effects must be written to tolerate repeats, and must also
/// tolerate being abandoned mid-flight on timeout or cancellation.
pub trait NodeHandler<S>: Send + Sync + 'static {
    fn run(&self, state: S, config: RunConfig) -> BoxFuture<'_, Result<StateUpdate>>;
}

impl<S, F, Fut> NodeHandler<S> for F
where
    S: Send + 'static,
    F: Fn(S, RunConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
{
    fn run(&self, state: S, config: RunConfig) -> BoxFuture<'_, Result<StateUpdate>> {
        Box::pin(self(state, config))
    }
}

/// Pin down a closure's argument and output types as a node handler.
///
/// Closures passed straight to a generic `H: NodeHandler<S>` parameter get no
/// signature hints from the compiler; routing them through this function does.
pub fn handler_fn<S, F, Fut>(f: F) -> F
where
    S: Send + 'static,
    F: Fn(S, RunConfig) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateUpdate>> + Send + 'static,
{
    f
}

/// Metrics sink. Write-only from the framework's point of view.
pub trait MetricsCollector: Send + Sync + 'static {
    fn record_success(&self, node_name: &str, duration: Duration);

    fn record_failure(
        &self,
        node_name: &str,
        duration: Duration,
        error: &NodeError,
        category: ErrorCategory,
    );

    fn record_retry(&self, node_name: &str, attempt: u32);
}

/// Node lifecycle logger.
pub trait NodeLogger: Send + Sync + 'static {
    fn log_entry(&self, node_name: &str, run_id: &str);

    fn log_exit(&self, node_name: &str, run_id: &str, duration: Duration, success: bool);

    fn log_error(&self, node_name: &str, run_id: &str, error: &NodeError, category: ErrorCategory);

    fn log_retry(&self, node_name: &str, attempt: u32, error: &NodeError, delay_ms: u64);
}
