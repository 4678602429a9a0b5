//! Retry engine with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use nodeward_core::config::RetryConfig;
use nodeward_core::error::{NodeError, Result};

use crate::classifier::classify;
use crate::hooks::{run_hook, OnRetryAttempt};
use crate::timeout::cancelled;

/// Successful outcome of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T> {
    pub value: T,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
    /// Errors from the failed attempts, in order.
    pub errors: Vec<NodeError>,
    /// Sum of the backoff delays actually waited.
    pub total_delay_ms: u64,
}

/// Options for one retry sequence.
pub struct RetryOptions<'a> {
    pub config: &'a RetryConfig,
    pub node_name: &'a str,
    pub on_retry_attempt: Option<&'a OnRetryAttempt>,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> RetryOptions<'a> {
    pub fn new(config: &'a RetryConfig, node_name: &'a str) -> Self {
        Self {
            config,
            node_name,
            on_retry_attempt: None,
            cancel: None,
        }
    }

    pub fn with_hook(mut self, hook: &'a OnRetryAttempt) -> Self {
        self.on_retry_attempt = Some(hook);
        self
    }

    pub fn with_cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Backoff delay in milliseconds to wait after failed attempt `attempt` (1-based).
///
/// `backoff_ms * multiplier^(attempt-1)`, capped at `max_backoff_ms`, plus a
/// uniform jitter in `[0, base * jitter_factor]`, floored.
pub fn calculate_retry_delay(attempt: u32, config: &RetryConfig) -> u64 {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let base = (config.backoff_ms as f64 * config.backoff_multiplier.powi(exponent))
        .min(config.max_backoff_ms as f64);

    let jitter = if config.jitter_factor > 0.0 {
        rand::random::<f64>() * base * config.jitter_factor
    } else {
        0.0
    };

    (base + jitter).floor() as u64
}

/// Invoke `operation` until it succeeds, fails with a non-retryable error,
/// or the attempt budget is spent.
///
/// Terminal failures are reported as [`NodeError::RetryExhausted`] carrying
/// every attempt's error. Cancellation during a backoff wait fails
/// immediately with [`NodeError::Cancelled`].
pub async fn with_node_retry<T, F, Fut>(
    mut operation: F,
    options: RetryOptions<'_>,
) -> Result<RetryResult<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = options.config.max_attempts.max(1);
    let mut attempt: u32 = 1;
    let mut errors: Vec<NodeError> = Vec::new();
    let mut total_delay_ms: u64 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(node = options.node_name, attempt, "Node succeeded after retry");
                }
                return Ok(RetryResult {
                    value,
                    attempts: attempt,
                    errors,
                    total_delay_ms,
                });
            }
            Err(e) => {
                let classification = classify(&e);
                if !classification.retryable || attempt >= max_attempts {
                    if !classification.retryable {
                        debug!(
                            node = options.node_name,
                            attempt,
                            category = %classification.category,
                            "Non-retryable error, giving up"
                        );
                    }
                    errors.push(e);
                    return Err(NodeError::RetryExhausted {
                        node_name: options.node_name.to_string(),
                        attempts: attempt,
                        errors,
                    });
                }

                let delay_ms = calculate_retry_delay(attempt, options.config);
                debug!(
                    node = options.node_name,
                    attempt,
                    max_attempts,
                    delay_ms,
                    category = %classification.category,
                    error = %e,
                    "Retrying node"
                );
                if let Some(hook) = options.on_retry_attempt {
                    run_hook("on_retry_attempt", options.node_name, || {
                        hook(attempt, &e, delay_ms)
                    });
                }
                errors.push(e);

                tokio::select! {
                    biased;
                    _ = cancelled(options.cancel) => {
                        return Err(NodeError::Cancelled {
                            node_name: options.node_name.to_string(),
                        });
                    }
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
                total_delay_ms += delay_ms;
                attempt += 1;
            }
        }
    }
}

/// Reusable retry runner with default settings.
#[derive(Debug, Clone)]
pub struct RetryWrapper {
    defaults: RetryConfig,
}

impl RetryWrapper {
    pub fn defaults(&self) -> &RetryConfig {
        &self.defaults
    }

    /// Run `operation` with the wrapper's defaults, or `config` when given.
    pub async fn run<T, F, Fut>(
        &self,
        node_name: &str,
        operation: F,
        config: Option<&RetryConfig>,
    ) -> Result<RetryResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = config.unwrap_or(&self.defaults);
        with_node_retry(operation, RetryOptions::new(config, node_name)).await
    }
}

pub fn create_retry_wrapper(defaults: RetryConfig) -> RetryWrapper {
    RetryWrapper { defaults }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn deterministic(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            timeout_ms: 0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn delay_without_jitter_is_exponential_and_capped() {
        let config = RetryConfig {
            max_backoff_ms: 5000,
            ..deterministic(10)
        };
        assert_eq!(calculate_retry_delay(1, &config), 1000);
        assert_eq!(calculate_retry_delay(2, &config), 2000);
        assert_eq!(calculate_retry_delay(3, &config), 4000);
        assert_eq!(calculate_retry_delay(4, &config), 5000);
        assert_eq!(calculate_retry_delay(20, &config), 5000);
    }

    #[test]
    fn delay_stays_capped_for_huge_attempt_numbers() {
        let config = deterministic(u32::MAX);
        assert_eq!(calculate_retry_delay(u32::MAX, &config), 30_000);
        assert_eq!(calculate_retry_delay(i32::MAX as u32 + 2, &config), 30_000);
    }

    #[test]
    fn first_delay_with_defaults_equals_backoff() {
        let config = RetryConfig::default().with_jitter_factor(0.0);
        assert_eq!(calculate_retry_delay(1, &config), config.backoff_ms);
    }

    #[test]
    fn fractional_multiplier_is_floored() {
        let config = RetryConfig {
            backoff_ms: 100,
            backoff_multiplier: 1.5,
            ..deterministic(5)
        };
        assert_eq!(calculate_retry_delay(2, &config), 150);
        assert_eq!(calculate_retry_delay(3, &config), 225);
        assert_eq!(calculate_retry_delay(4, &config), 337);
    }

    #[test]
    fn jitter_stays_in_range_and_varies() {
        let config = RetryConfig {
            jitter_factor: 0.5,
            ..deterministic(5)
        };
        let samples: Vec<u64> = (0..100).map(|_| calculate_retry_delay(2, &config)).collect();
        assert!(samples.iter().all(|d| (2000..=3000).contains(d)));
        assert!(samples.iter().any(|d| *d != samples[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_network_failures() {
        let calls = AtomicU32::new(0);
        let config = deterministic(5);

        let result = with_node_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(NodeError::network("connection reset"))
                } else {
                    Ok("synthesized")
                }
            },
            RetryOptions::new(&config, "synthesize"),
        )
        .await
        .unwrap();

        assert_eq!(result.value, "synthesized");
        assert_eq!(result.attempts, 3);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.total_delay_ms, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn validation_error_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let config = deterministic(5);

        let err = with_node_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(NodeError::validation("missing title"))
            },
            RetryOptions::new(&config, "seed"),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            NodeError::RetryExhausted { attempts, errors, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_carries_attempts_and_last_error() {
        let calls = AtomicU32::new(0);
        let config = deterministic(4);

        let err = with_node_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(NodeError::network(format!("failure {}", n + 1)))
            },
            RetryOptions::new(&config, "fanout_qa"),
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, NodeError::RetryExhausted { attempts: 4, .. }));
        assert!(matches!(err.last_error(), NodeError::Network(m) if m == "failure 4"));
    }

    #[tokio::test(start_paused = true)]
    async fn hook_receives_attempt_and_delay_and_failures_are_swallowed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let hook: OnRetryAttempt = Arc::new(move |attempt: u32, _err: &NodeError, delay: u64| {
            sink.lock().unwrap().push((attempt, delay));
            Err(anyhow::anyhow!("metrics sink unavailable"))
        });
        let config = deterministic(3);
        let calls = AtomicU32::new(0);

        let result = with_node_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NodeError::other("flaky"))
                } else {
                    Ok(())
                }
            },
            RetryOptions::new(&config, "attack").with_hook(&hook),
        )
        .await
        .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1000), (2, 2000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_full_delay_between_attempts() {
        let config = deterministic(2);
        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);

        let _ = with_node_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(NodeError::network("down"))
            },
            RetryOptions::new(&config, "gap_hygiene"),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_fails_immediately() {
        let token = CancellationToken::new();
        let config = RetryConfig {
            backoff_ms: 60_000,
            ..deterministic(5)
        };
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let err = with_node_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(NodeError::network("down"))
            },
            RetryOptions::new(&config, "readiness").with_cancel(&token),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, NodeError::Cancelled { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(60_000));
    }

    #[tokio::test(start_paused = true)]
    async fn wrapper_applies_defaults_unless_overridden() {
        let wrapper = create_retry_wrapper(deterministic(2));
        let calls = AtomicU32::new(0);
        let _ = wrapper
            .run(
                "delta_detect",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(NodeError::network("down"))
                },
                None,
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        calls.store(0, Ordering::SeqCst);
        let single = deterministic(1);
        let _ = wrapper
            .run(
                "delta_detect",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(NodeError::network("down"))
                },
                Some(&single),
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(wrapper.defaults().max_attempts, 2);
    }
}
