//! Per-attempt deadline and cancellation race.
//!
//! The wrapped operation is never preempted. When the timer or the
//! cancellation token wins, the wrapper drops the operation's future and
//! returns; anything the operation already spawned or dispatched elsewhere
//! keeps running. Node authors must design for abandonment.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use nodeward_core::error::{NodeError, Result};
use nodeward_core::types::NodeExecutionContext;

use crate::hooks::{run_hook, OnTimeout};

/// Options for a single timed attempt.
#[derive(Clone)]
pub struct TimeoutOptions {
    /// Deadline in milliseconds. 0 disables the timer.
    pub timeout_ms: u64,
    pub node_name: String,
    pub cancel: Option<CancellationToken>,
    pub on_timeout: Option<OnTimeout>,
    pub context: NodeExecutionContext,
}

/// Race `operation` against the deadline and the cancellation token.
pub async fn with_timeout<T, Fut>(operation: Fut, options: TimeoutOptions) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
        return Err(NodeError::Cancelled {
            node_name: options.node_name,
        });
    }

    let timeout_ms = options.timeout_ms;
    let deadline = async move {
        if timeout_ms == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await
        }
    };

    tokio::select! {
        biased;
        _ = cancelled(options.cancel.as_ref()) => Err(NodeError::Cancelled {
            node_name: options.node_name,
        }),
        result = operation => result,
        _ = deadline => {
            warn!(
                node = %options.node_name,
                run_id = %options.context.run_id,
                timeout_ms,
                "Node attempt timed out"
            );
            if let Some(hook) = &options.on_timeout {
                run_hook("on_timeout", &options.node_name, || {
                    hook(&options.node_name, &options.context)
                });
            }
            Err(NodeError::Timeout {
                node_name: options.node_name,
                timeout_ms,
            })
        }
    }
}

/// Resolves when the token fires; never resolves without a token.
pub(crate) async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn options(timeout_ms: u64) -> TimeoutOptions {
        TimeoutOptions {
            timeout_ms,
            node_name: "fanout_pm".into(),
            cancel: None,
            on_timeout: None,
            context: NodeExecutionContext::new("wrkf-1020", "fanout_pm", 1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fast_operation_passes_through() {
        let result = with_timeout(async { Ok(42) }, options(1000)).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out_and_calls_hook() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut opts = options(1000);
        opts.on_timeout = Some(Arc::new(move |node: &str, ctx: &NodeExecutionContext| {
            assert_eq!(node, "fanout_pm");
            assert_eq!(ctx.run_id, "wrkf-1020");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let result: Result<()> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(5000)).await;
                Ok(())
            },
            opts,
        )
        .await;

        assert!(matches!(
            result,
            Err(NodeError::Timeout { timeout_ms: 1000, ref node_name }) if node_name == "fanout_pm"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_timeout_hook_does_not_change_outcome() {
        let mut opts = options(10);
        opts.on_timeout = Some(Arc::new(|_: &str, _: &NodeExecutionContext| {
            Err(anyhow::anyhow!("alerting down"))
        }));
        let result: Result<()> = with_timeout(std::future::pending(), opts).await;
        assert!(matches!(result, Err(NodeError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_runs_uncapped() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("done")
            },
            options(0),
        )
        .await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn already_cancelled_fails_without_polling() {
        let token = CancellationToken::new();
        token.cancel();
        let mut opts = options(1000);
        opts.cancel = Some(token);

        let polled = Arc::new(AtomicU32::new(0));
        let p = polled.clone();
        let result = with_timeout(
            async move {
                p.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            opts,
        )
        .await;

        assert!(matches!(result, Err(NodeError::Cancelled { .. })));
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_execution_fails_promptly() {
        let token = CancellationToken::new();
        let mut opts = options(0);
        opts.cancel = Some(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let start = tokio::time::Instant::now();
        let result: Result<()> = with_timeout(std::future::pending(), opts).await;
        assert!(matches!(result, Err(NodeError::Cancelled { .. })));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
