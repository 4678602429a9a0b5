//! Node factory: wraps a handler with circuit breaking, retry, timeout,
//! logging and metrics, and turns every failure into a state update.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use nodeward_core::config::{CircuitBreakerConfig, PolicyConfig, RetryConfig};
use nodeward_core::error::{ConfigError, NodeError, Result};
use nodeward_core::state::GraphState;
use nodeward_core::traits::{MetricsCollector, NodeHandler, NodeLogger};
use nodeward_core::types::{
    Classification, ErrorCategory, NodeExecutionContext, RunConfig, StateUpdate,
};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::classifier::classify;
use crate::hooks::{run_hook, OnRetryAttempt, OnTimeout};
use crate::logging::TracingNodeLogger;
use crate::retry::{with_node_retry, RetryOptions};
use crate::state_helpers::{codes, create_blocked_update, create_error_update};
use crate::timeout::{with_timeout, TimeoutOptions};

/// Construction-time configuration of one node.
#[derive(Clone, Default)]
pub struct NodeConfig {
    pub name: String,
    /// Defaults to [`RetryConfig::default`] when unset.
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub on_timeout: Option<OnTimeout>,
    pub on_retry_attempt: Option<OnRetryAttempt>,
    pub metrics_collector: Option<Arc<dyn MetricsCollector>>,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_on_timeout(mut self, hook: OnTimeout) -> Self {
        self.on_timeout = Some(hook);
        self
    }

    pub fn with_on_retry_attempt(mut self, hook: OnRetryAttempt) -> Self {
        self.on_retry_attempt = Some(hook);
        self
    }

    pub fn with_metrics(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("on_timeout", &self.on_timeout.is_some())
            .field("on_retry_attempt", &self.on_retry_attempt.is_some())
            .field("metrics_collector", &self.metrics_collector.is_some())
            .finish()
    }
}

/// Builds wrapped nodes. Owns the circuit breakers of every node it builds.
///
/// Breaker state lives as long as the registry. Share one registry between
/// factories (see [`NodeFactory::with_registry`]) to keep breaker state when
/// a graph is rebuilt; a new factory starts with every breaker closed.
#[derive(Clone)]
pub struct NodeFactory {
    breakers: CircuitBreakerRegistry,
    logger: Arc<dyn NodeLogger>,
}

impl Default for NodeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory {
    pub fn new() -> Self {
        Self::with_registry(CircuitBreakerRegistry::new())
    }

    pub fn with_registry(breakers: CircuitBreakerRegistry) -> Self {
        Self {
            breakers,
            logger: Arc::new(TracingNodeLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn NodeLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Validate `config` and wrap `handler`. Invalid configuration fails here,
    /// never at invocation time.
    pub fn create_node<S, H>(
        &self,
        config: NodeConfig,
        handler: H,
    ) -> std::result::Result<WrappedNode<S>, ConfigError>
    where
        S: GraphState,
        H: NodeHandler<S>,
    {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        let name = name.to_string();

        let retry = config.retry.unwrap_or_default();
        retry.validate()?;

        let breaker = match &config.circuit_breaker {
            Some(cb) => {
                cb.validate()?;
                Some(self.breakers.get_or_create(&name, cb))
            }
            None => None,
        };

        let on_retry_attempt = compose_retry_hook(
            name.clone(),
            self.logger.clone(),
            config.metrics_collector.clone(),
            config.on_retry_attempt,
        );

        debug!(
            node = %name,
            max_attempts = retry.max_attempts,
            timeout_ms = retry.timeout_ms,
            circuit_breaker = breaker.is_some(),
            "Node created"
        );

        Ok(WrappedNode {
            inner: Arc::new(NodeInner {
                name,
                retry,
                breaker,
                handler: Box::new(handler),
                on_timeout: config.on_timeout,
                on_retry_attempt,
                metrics: config.metrics_collector,
                logger: self.logger.clone(),
            }),
        })
    }

    /// Single attempt, no timeout.
    pub fn simple_node<S, H>(
        &self,
        name: &str,
        handler: H,
    ) -> std::result::Result<WrappedNode<S>, ConfigError>
    where
        S: GraphState,
        H: NodeHandler<S>,
    {
        self.create_node(NodeConfig::new(name).with_retry(RetryConfig::simple()), handler)
    }

    /// Patient retries for model calls.
    pub fn llm_node<S, H>(
        &self,
        name: &str,
        handler: H,
    ) -> std::result::Result<WrappedNode<S>, ConfigError>
    where
        S: GraphState,
        H: NodeHandler<S>,
    {
        self.create_node(NodeConfig::new(name).with_retry(RetryConfig::llm()), handler)
    }

    /// Short retries for tool and API calls.
    pub fn tool_node<S, H>(
        &self,
        name: &str,
        handler: H,
    ) -> std::result::Result<WrappedNode<S>, ConfigError>
    where
        S: GraphState,
        H: NodeHandler<S>,
    {
        self.create_node(NodeConfig::new(name).with_retry(RetryConfig::tool()), handler)
    }

    /// Build a node from its entry in a policy file (or the file's defaults).
    pub fn create_from_policy<S, H>(
        &self,
        name: &str,
        policies: &PolicyConfig,
        handler: H,
    ) -> std::result::Result<WrappedNode<S>, ConfigError>
    where
        S: GraphState,
        H: NodeHandler<S>,
    {
        let policy = policies.policy_for(name);
        let mut config = NodeConfig::new(name).with_retry(policy.retry_config());
        if let Some(cb) = &policy.circuit_breaker {
            config = config.with_circuit_breaker(cb.clone());
        }
        self.create_node(config, handler)
    }
}

/// Retry hook seen by the retry engine: logger, then metrics, then the
/// caller's own hook.
fn compose_retry_hook(
    name: String,
    logger: Arc<dyn NodeLogger>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    user_hook: Option<OnRetryAttempt>,
) -> OnRetryAttempt {
    Arc::new(move |attempt: u32, err: &NodeError, delay_ms: u64| {
        logger.log_retry(&name, attempt, err, delay_ms);
        if let Some(metrics) = &metrics {
            metrics.record_retry(&name, attempt);
        }
        match &user_hook {
            Some(hook) => hook(attempt, err, delay_ms),
            None => Ok(()),
        }
    })
}

struct NodeInner<S> {
    name: String,
    retry: RetryConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    handler: Box<dyn NodeHandler<S>>,
    on_timeout: Option<OnTimeout>,
    on_retry_attempt: OnRetryAttempt,
    metrics: Option<Arc<dyn MetricsCollector>>,
    logger: Arc<dyn NodeLogger>,
}

/// A handler wrapped with the node's execution policy. Cheap to clone.
pub struct WrappedNode<S> {
    inner: Arc<NodeInner<S>>,
}

impl<S> Clone for WrappedNode<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> std::fmt::Debug for WrappedNode<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedNode")
            .field("name", &self.inner.name)
            .field("retry", &self.inner.retry)
            .finish()
    }
}

impl<S: GraphState> WrappedNode<S> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.inner.breaker.as_ref()
    }

    /// Run the node against `state`.
    ///
    /// Always returns a state update. Failures become error or blocked
    /// updates; only a panicking handler unwinds through this call.
    pub async fn invoke(&self, state: &S, run_config: Option<RunConfig>) -> StateUpdate {
        let node = &*self.inner;
        let run_config = run_config.unwrap_or_default();
        // Anonymous runs still get an id so their log lines correlate.
        let run_id = state.run_id().unwrap_or_else(|| Uuid::new_v4().to_string());

        node.observe("log_entry", |l, _| l.log_entry(&node.name, &run_id));
        let started = Instant::now();

        if let Some(breaker) = &node.breaker {
            if !breaker.can_execute() {
                let err = NodeError::CircuitOpen {
                    node_name: node.name.clone(),
                    recovery_in_ms: breaker.status().time_until_recovery_ms,
                };
                node.observe("log_error", |l, _| {
                    l.log_error(&node.name, &run_id, &err, ErrorCategory::CircuitOpen)
                });
                breaker.record_failure();
                let duration = started.elapsed();
                node.observe("log_exit", |l, _| l.log_exit(&node.name, &run_id, duration, false));
                return create_blocked_update(
                    &node.name,
                    err.to_string(),
                    ErrorCategory::CircuitOpen,
                    codes::CIRCUIT_OPEN,
                );
            }
        }

        let outcome = node.execute(state, &run_config, &run_id).await;
        let duration = started.elapsed();

        match outcome {
            Ok(update) => {
                if let Some(breaker) = &node.breaker {
                    breaker.record_success();
                }
                node.observe("record_success", |_, m| {
                    if let Some(m) = m {
                        m.record_success(&node.name, duration);
                    }
                });
                node.observe("log_exit", |l, _| l.log_exit(&node.name, &run_id, duration, true));
                update
            }
            Err(err) => {
                if let Some(breaker) = &node.breaker {
                    breaker.record_failure();
                }
                let classification = classify(&err);
                node.observe("record_failure", |_, m| {
                    if let Some(m) = m {
                        m.record_failure(&node.name, duration, &err, classification.category);
                    }
                });
                node.observe("log_error", |l, _| {
                    l.log_error(&node.name, &run_id, &err, classification.category)
                });
                node.observe("log_exit", |l, _| l.log_exit(&node.name, &run_id, duration, false));
                failure_update(&node.name, &err, classification)
            }
        }
    }
}

impl<S: GraphState> NodeInner<S> {
    async fn execute(
        &self,
        state: &S,
        run_config: &RunConfig,
        run_id: &str,
    ) -> Result<StateUpdate> {
        let context = NodeExecutionContext::new(run_id, &self.name, self.retry.max_attempts);
        let attempt = move || {
            let options = TimeoutOptions {
                timeout_ms: self.retry.timeout_ms,
                node_name: self.name.clone(),
                cancel: run_config.cancel.clone(),
                on_timeout: self.on_timeout.clone(),
                context: context.clone(),
            };
            with_timeout(self.handler.run(state.clone(), run_config.clone()), options)
        };

        if self.retry.max_attempts == 1 {
            return attempt().await;
        }

        let mut options =
            RetryOptions::new(&self.retry, &self.name).with_hook(&self.on_retry_attempt);
        if let Some(token) = run_config.cancel.as_ref() {
            options = options.with_cancel(token);
        }
        with_node_retry(attempt, options).await.map(|r| r.value)
    }

    /// Call the logger or metrics sink inside a hook boundary.
    fn observe<F>(&self, what: &str, f: F)
    where
        F: FnOnce(&dyn NodeLogger, Option<&dyn MetricsCollector>),
    {
        run_hook(what, &self.name, || {
            f(self.logger.as_ref(), self.metrics.as_deref());
            Ok(())
        });
    }
}

/// Translate a terminal failure into the update the graph routes on.
fn failure_update(node_name: &str, err: &NodeError, classification: Classification) -> StateUpdate {
    if let NodeError::RetryExhausted { .. } = err {
        let last = err.last_error();
        let last_class = classify(last);
        // The engine also stops on a non-retryable error; that is an
        // outright failure, not an exhausted budget.
        if !last_class.retryable {
            return create_error_update(
                node_name,
                last.to_string(),
                last_class.category,
                false,
                Some(codes::NODE_ERROR),
            );
        }
        return create_blocked_update(
            node_name,
            last.to_string(),
            last_class.category,
            codes::RETRY_EXHAUSTED,
        );
    }

    if !classification.retryable {
        return create_error_update(
            node_name,
            err.to_string(),
            classification.category,
            false,
            Some(codes::NODE_ERROR),
        );
    }

    create_blocked_update(
        node_name,
        err.to_string(),
        classification.category,
        codes::NODE_FAILED,
    )
}
