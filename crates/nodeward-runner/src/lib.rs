pub mod circuit_breaker;
pub mod classifier;
pub mod factory;
pub mod hooks;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod state_helpers;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerStatus, CircuitState,
};
pub use classifier::{classify, is_retryable};
pub use factory::{NodeConfig, NodeFactory, WrappedNode};
pub use hooks::{OnRetryAttempt, OnTimeout};
pub use logging::TracingNodeLogger;
pub use metrics::{MetricsConfig, NodeMetrics, NodeMetricsCollector};
pub use retry::{
    calculate_retry_delay, create_retry_wrapper, with_node_retry, RetryOptions, RetryResult,
    RetryWrapper,
};
pub use state_helpers::{
    codes, create_blocked_update, create_error_update, create_warning_update, merge_updates,
    update_state,
};
pub use timeout::{with_timeout, TimeoutOptions};
