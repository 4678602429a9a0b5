//! Builders for the partial state updates the factory and nodes emit.

use serde_json::Value;

use nodeward_core::types::{ErrorCategory, ErrorEntry, RoutingFlag, StateUpdate};

/// Error codes attached to synthesized error entries.
pub mod codes {
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const RETRY_EXHAUSTED: &str = "RETRY_EXHAUSTED";
    pub const NODE_ERROR: &str = "NODE_ERROR";
    pub const NODE_FAILED: &str = "NODE_FAILED";
}

/// Data-only update from `(field, value)` pairs.
pub fn update_state<I, K>(fields: I) -> StateUpdate
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields
        .into_iter()
        .fold(StateUpdate::new(), |update, (key, value)| update.with_data(key, value))
}

/// Update carrying a single error entry and no routing decision.
pub fn create_error_update(
    node_id: &str,
    message: impl Into<String>,
    category: ErrorCategory,
    recoverable: bool,
    code: Option<&str>,
) -> StateUpdate {
    let mut entry = ErrorEntry::new(node_id, message, category, recoverable);
    if let Some(code) = code {
        entry = entry.with_code(code);
    }
    StateUpdate::new().with_error(entry)
}

/// Recoverable error entry plus the `blocked` routing flag.
pub fn create_blocked_update(
    node_id: &str,
    message: impl Into<String>,
    category: ErrorCategory,
    code: &str,
) -> StateUpdate {
    create_error_update(node_id, message, category, true, Some(code))
        .with_flag(RoutingFlag::Blocked, true)
}

pub fn create_warning_update(warning: impl Into<String>) -> StateUpdate {
    StateUpdate::new().with_warning(warning)
}

/// Combine updates left to right. Errors and warnings accumulate; later
/// flags and data fields win.
pub fn merge_updates<I>(updates: I) -> StateUpdate
where
    I: IntoIterator<Item = StateUpdate>,
{
    updates.into_iter().fold(StateUpdate::new(), |mut acc, update| {
        acc.errors.extend(update.errors);
        acc.warnings.extend(update.warnings);
        acc.routing_flags.extend(update.routing_flags);
        acc.data.extend(update.data);
        acc
    })
}
