use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{ErrorEntry, RoutingFlag, StateUpdate};

/// Shared graph state as seen by the execution framework.
///
/// The framework only needs a run identifier for log correlation; everything
/// else about the state belongs to the graph and its nodes.
pub trait GraphState: Clone + Send + Sync + 'static {
    /// Identifier of the workflow run this state belongs to.
    fn run_id(&self) -> Option<String>;
}

/// Workflow state of the story pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub epic_prefix: String,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub routing_flags: BTreeMap<RoutingFlag, bool>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl WorkflowState {
    pub fn new(epic_prefix: impl Into<String>, story_id: impl Into<String>) -> Self {
        Self {
            epic_prefix: epic_prefix.into(),
            story_id: Some(story_id.into()),
            ..Default::default()
        }
    }

    /// Merge a partial update into this state.
    ///
    /// Errors and warnings accumulate; routing flags and data fields are
    /// overwritten key by key.
    pub fn apply(&mut self, update: StateUpdate) {
        self.errors.extend(update.errors);
        self.warnings.extend(update.warnings);
        self.routing_flags.extend(update.routing_flags);
        self.data.extend(update.data);
    }

    pub fn flag(&self, flag: RoutingFlag) -> bool {
        self.routing_flags.get(&flag).copied().unwrap_or(false)
    }
}

impl GraphState for WorkflowState {
    fn run_id(&self) -> Option<String> {
        match self.story_id.as_deref() {
            Some(id) if !id.is_empty() => Some(id.to_string()),
            _ if !self.epic_prefix.is_empty() => Some(self.epic_prefix.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCategory;

    #[test]
    fn run_id_prefers_story_id() {
        let state = WorkflowState::new("wrkf", "wrkf-1020");
        assert_eq!(state.run_id().as_deref(), Some("wrkf-1020"));

        let state = WorkflowState {
            epic_prefix: "wrkf".into(),
            ..Default::default()
        };
        assert_eq!(state.run_id().as_deref(), Some("wrkf"));

        assert_eq!(WorkflowState::default().run_id(), None);
    }

    #[test]
    fn apply_accumulates_errors_and_overrides_flags() {
        let mut state = WorkflowState::new("wrkf", "wrkf-1");
        state.apply(
            StateUpdate::new()
                .with_flag(RoutingFlag::Proceed, true)
                .with_warning("thin context"),
        );
        state.apply(
            StateUpdate::new()
                .with_flag(RoutingFlag::Proceed, false)
                .with_flag(RoutingFlag::Blocked, true)
                .with_error(ErrorEntry::new("seed", "boom", ErrorCategory::Unknown, true))
                .with_data("seed", serde_json::json!({"title": "x"})),
        );

        assert!(!state.flag(RoutingFlag::Proceed));
        assert!(state.flag(RoutingFlag::Blocked));
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.warnings, vec!["thin context".to_string()]);
        assert!(state.data.contains_key("seed"));
    }
}
