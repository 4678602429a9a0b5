use std::time::Duration;

use tracing::{debug, error, info, warn};

use nodeward_core::error::NodeError;
use nodeward_core::traits::NodeLogger;
use nodeward_core::types::ErrorCategory;

/// Default [`NodeLogger`] writing structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNodeLogger;

impl NodeLogger for TracingNodeLogger {
    fn log_entry(&self, node_name: &str, run_id: &str) {
        debug!(node = node_name, run_id, "Node started");
    }

    fn log_exit(&self, node_name: &str, run_id: &str, duration: Duration, success: bool) {
        let duration_ms = duration.as_millis() as u64;
        if success {
            info!(node = node_name, run_id, duration_ms, "Node completed");
        } else {
            error!(node = node_name, run_id, duration_ms, "Node failed");
        }
    }

    fn log_error(&self, node_name: &str, run_id: &str, err: &NodeError, category: ErrorCategory) {
        error!(
            node = node_name,
            run_id,
            category = %category,
            error = %err,
            "Node error"
        );
    }

    fn log_retry(&self, node_name: &str, attempt: u32, err: &NodeError, delay_ms: u64) {
        warn!(node = node_name, attempt, delay_ms, error = %err, "Node retry scheduled");
    }
}
