use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::warn;

use nodeward_core::error::NodeError;
use nodeward_core::types::NodeExecutionContext;

/// Called before each backoff wait with `(attempt, error, delay_ms)`.
pub type OnRetryAttempt = Arc<dyn Fn(u32, &NodeError, u64) -> anyhow::Result<()> + Send + Sync>;

/// Called when an attempt hits its deadline, before the timeout error propagates.
pub type OnTimeout = Arc<dyn Fn(&str, &NodeExecutionContext) -> anyhow::Result<()> + Send + Sync>;

/// Run an external hook in its own error boundary.
/// Fire-and-forget: errors and panics are logged, not propagated.
pub fn run_hook<F>(hook: &str, node_name: &str, f: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(hook, node = node_name, error = %e, "Hook failed, ignoring"),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(hook, node = node_name, reason = %reason, "Hook panicked, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn hook_error_is_swallowed() {
        run_hook("on_retry_attempt", "seed", || Err(anyhow::anyhow!("sink down")));
    }

    #[test]
    fn hook_panic_is_swallowed() {
        run_hook("on_timeout", "seed", || panic!("hook bug"));
    }

    #[test]
    fn hook_runs() {
        let ran = AtomicBool::new(false);
        run_hook("on_retry_attempt", "seed", || {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(ran.load(Ordering::SeqCst));
    }
}
