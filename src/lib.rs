//! Resilient execution of workflow graph nodes.
//!
//! A node is an async handler from graph state to a partial [`StateUpdate`].
//! [`NodeFactory`] wraps it with a circuit breaker, a retry loop with
//! exponential backoff and jitter, a per-attempt timeout, logging, and
//! metrics. Every failure comes back as a typed state update the graph can
//! route on.
//!
//! ```no_run
//! use nodeward::{handler_fn, NodeConfig, NodeFactory, RetryConfig, RoutingFlag, StateUpdate, WorkflowState};
//!
//! # async fn demo() -> Result<(), nodeward::ConfigError> {
//! let factory = NodeFactory::new();
//! let node = factory.create_node(
//!     NodeConfig::new("readiness_score").with_retry(RetryConfig::tool()),
//!     handler_fn(|_state: WorkflowState, _config| async {
//!         Ok(StateUpdate::new().with_flag(RoutingFlag::Proceed, true))
//!     }),
//! )?;
//!
//! let update = node.invoke(&WorkflowState::new("wrkf", "wrkf-1020"), None).await;
//! assert_eq!(update.flag(RoutingFlag::Proceed), Some(true));
//! # Ok(())
//! # }
//! ```

pub use nodeward_core::*;
pub use nodeward_runner::*;
