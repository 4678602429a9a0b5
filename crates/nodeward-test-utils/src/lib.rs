//! Test doubles and fixtures shared by nodeward crates.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing_subscriber::EnvFilter;

use nodeward_core::error::{NodeError, Result};
use nodeward_core::state::WorkflowState;
use nodeward_core::traits::{MetricsCollector, NodeHandler, NodeLogger};
use nodeward_core::types::{ErrorCategory, RoutingFlag, RunConfig, StateUpdate};

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nodeward=debug,warn")),
        )
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// State for the `wrkf-1020` story used across tests.
pub fn sample_state() -> WorkflowState {
    WorkflowState::new("wrkf", "wrkf-1020")
}

/// Update with only `proceed = true`.
pub fn proceed() -> StateUpdate {
    StateUpdate::new().with_flag(RoutingFlag::Proceed, true)
}

/// Write `content` to a temporary `nodes.toml`.
pub fn policy_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("nodes")
        .suffix(".toml")
        .tempfile()
        .expect("create temp policy file");
    file.write_all(content.as_bytes()).expect("write temp policy file");
    file
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Success { node: String, duration: Duration },
    Failure { node: String, category: ErrorCategory, message: String },
    Retry { node: String, attempt: u32 },
}

/// Metrics sink that records every call.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retries(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MetricEvent::Retry { .. }))
            .count()
    }
}

impl MetricsCollector for RecordingMetrics {
    fn record_success(&self, node_name: &str, duration: Duration) {
        self.events.lock().unwrap().push(MetricEvent::Success {
            node: node_name.to_string(),
            duration,
        });
    }

    fn record_failure(
        &self,
        node_name: &str,
        _duration: Duration,
        error: &NodeError,
        category: ErrorCategory,
    ) {
        self.events.lock().unwrap().push(MetricEvent::Failure {
            node: node_name.to_string(),
            category,
            message: error.to_string(),
        });
    }

    fn record_retry(&self, node_name: &str, attempt: u32) {
        self.events.lock().unwrap().push(MetricEvent::Retry {
            node: node_name.to_string(),
            attempt,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Entry { node: String, run_id: String },
    Exit { node: String, success: bool },
    Error { node: String, category: ErrorCategory },
    Retry { node: String, attempt: u32, delay_ms: u64 },
}

/// Logger that records lifecycle events instead of emitting them.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NodeLogger for RecordingLogger {
    fn log_entry(&self, node_name: &str, run_id: &str) {
        self.events.lock().unwrap().push(LogEvent::Entry {
            node: node_name.to_string(),
            run_id: run_id.to_string(),
        });
    }

    fn log_exit(&self, node_name: &str, _run_id: &str, _duration: Duration, success: bool) {
        self.events.lock().unwrap().push(LogEvent::Exit {
            node: node_name.to_string(),
            success,
        });
    }

    fn log_error(
        &self,
        node_name: &str,
        _run_id: &str,
        _error: &NodeError,
        category: ErrorCategory,
    ) {
        self.events.lock().unwrap().push(LogEvent::Error {
            node: node_name.to_string(),
            category,
        });
    }

    fn log_retry(&self, node_name: &str, attempt: u32, _error: &NodeError, delay_ms: u64) {
        self.events.lock().unwrap().push(LogEvent::Retry {
            node: node_name.to_string(),
            attempt,
            delay_ms,
        });
    }
}

type ErrorFactory = Arc<dyn Fn() -> NodeError + Send + Sync>;

#[derive(Clone)]
enum Step {
    Succeed(StateUpdate),
    Fail(ErrorFactory),
}

/// Handler that plays back a script of outcomes, then repeats the last one.
#[derive(Clone)]
pub struct ScriptedHandler {
    steps: Arc<Mutex<VecDeque<Step>>>,
    last: Arc<Mutex<Step>>,
    delay: Option<Duration>,
    calls: Arc<AtomicU32>,
}

impl ScriptedHandler {
    fn from_steps(steps: Vec<Step>) -> Self {
        let mut steps: VecDeque<Step> = steps.into();
        let last = steps.pop_back().unwrap_or(Step::Succeed(StateUpdate::new()));
        Self {
            steps: Arc::new(Mutex::new(steps)),
            last: Arc::new(Mutex::new(last)),
            delay: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn succeeding(update: StateUpdate) -> Self {
        Self::from_steps(vec![Step::Succeed(update)])
    }

    pub fn always_failing<F>(make_error: F) -> Self
    where
        F: Fn() -> NodeError + Send + Sync + 'static,
    {
        Self::from_steps(vec![Step::Fail(Arc::new(make_error))])
    }

    /// Fail `failures` times, then succeed with `update` forever.
    pub fn failing_then<F>(failures: usize, make_error: F, update: StateUpdate) -> Self
    where
        F: Fn() -> NodeError + Send + Sync + 'static,
    {
        let make_error: ErrorFactory = Arc::new(make_error);
        let mut steps: Vec<Step> = (0..failures).map(|_| Step::Fail(make_error.clone())).collect();
        steps.push(Step::Succeed(update));
        Self::from_steps(steps)
    }

    /// Sleep for `delay` (tokio time) before every outcome.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter, usable after the handler has been moved into a node.
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }

    fn next_step(&self) -> Step {
        match self.steps.lock().unwrap().pop_front() {
            Some(step) => step,
            None => self.last.lock().unwrap().clone(),
        }
    }
}

impl<S: Send + 'static> NodeHandler<S> for ScriptedHandler {
    fn run(&self, _state: S, _config: RunConfig) -> BoxFuture<'_, Result<StateUpdate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Succeed(update) => Ok(update),
                Step::Fail(make_error) => Err(make_error()),
            }
        })
    }
}
