pub mod config;
pub mod error;
pub mod state;
pub mod traits;
pub mod types;

pub use config::{CircuitBreakerConfig, NodePolicy, PolicyConfig, Preset, RetryConfig};
pub use error::{ConfigError, NodeError, Result};
pub use state::{GraphState, WorkflowState};
pub use traits::{handler_fn, MetricsCollector, NodeHandler, NodeLogger};
pub use types::*;
