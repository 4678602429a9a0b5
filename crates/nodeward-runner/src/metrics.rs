//! In-memory node metrics: counts, rolling duration percentiles, failures by category.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use nodeward_core::error::NodeError;
use nodeward_core::traits::MetricsCollector;
use nodeward_core::types::ErrorCategory;

use crate::hooks::run_hook;

/// Called with `(node_name, failure_rate)` when the rate exceeds the threshold.
pub type OnFailureRate = Arc<dyn Fn(&str, f64) -> anyhow::Result<()> + Send + Sync>;

/// Called with `(node_name, p99_ms)` when p99 latency exceeds the threshold.
pub type OnLatency = Arc<dyn Fn(&str, u64) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Failure rate in `[0, 1]` above which the failure-rate callback fires.
    #[serde(default)]
    pub failure_rate_threshold: Option<f64>,
    #[serde(default)]
    pub latency_threshold_ms: Option<u64>,
}

fn default_window_size() -> usize {
    100
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            failure_rate_threshold: None,
            latency_threshold_ms: None,
        }
    }
}

/// Snapshot of one node's metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub last_execution_ms: Option<u64>,
    pub avg_execution_ms: f64,
    pub p50: Option<u64>,
    pub p90: Option<u64>,
    pub p99: Option<u64>,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
}

/// Fixed-capacity window of recent durations. Oldest samples are evicted first.
#[derive(Debug)]
struct RollingWindow {
    capacity: usize,
    samples: VecDeque<u64>,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    fn push(&mut self, value: u64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn percentiles(&self, ps: &[u32]) -> Vec<Option<u64>> {
        if self.samples.is_empty() {
            return vec![None; ps.len()];
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let last = (sorted.len() - 1) as f64;
        ps.iter()
            .map(|p| {
                let index = ((*p as f64 / 100.0) * last).floor() as usize;
                Some(sorted[index])
            })
            .collect()
    }
}

#[derive(Debug)]
struct NodeEntry {
    total_executions: u64,
    success_count: u64,
    failure_count: u64,
    retry_count: u64,
    last_execution_ms: Option<u64>,
    total_duration_ms: u64,
    errors_by_category: BTreeMap<ErrorCategory, u64>,
    window: RollingWindow,
}

impl NodeEntry {
    fn new(window_size: usize) -> Self {
        Self {
            total_executions: 0,
            success_count: 0,
            failure_count: 0,
            retry_count: 0,
            last_execution_ms: None,
            total_duration_ms: 0,
            errors_by_category: BTreeMap::new(),
            window: RollingWindow::new(window_size),
        }
    }

    fn record_execution(&mut self, duration_ms: u64) {
        self.total_executions += 1;
        self.last_execution_ms = Some(duration_ms);
        self.total_duration_ms = self.total_duration_ms.saturating_add(duration_ms);
        self.window.push(duration_ms);
    }

    fn snapshot(&self) -> NodeMetrics {
        let pcts = self.window.percentiles(&[50, 90, 99]);
        let avg_execution_ms = if self.total_executions > 0 {
            self.total_duration_ms as f64 / self.total_executions as f64
        } else {
            0.0
        };
        NodeMetrics {
            total_executions: self.total_executions,
            success_count: self.success_count,
            failure_count: self.failure_count,
            retry_count: self.retry_count,
            last_execution_ms: self.last_execution_ms,
            avg_execution_ms,
            p50: pcts[0],
            p90: pcts[1],
            p99: pcts[2],
            errors_by_category: self.errors_by_category.clone(),
        }
    }
}

/// Threshold breaches detected while the lock was held, reported after release.
#[derive(Default)]
struct Breaches {
    failure_rate: Option<f64>,
    p99_ms: Option<u64>,
}

pub struct NodeMetricsCollector {
    config: MetricsConfig,
    nodes: Mutex<HashMap<String, NodeEntry>>,
    on_failure_rate: Option<OnFailureRate>,
    on_latency: Option<OnLatency>,
}

impl std::fmt::Debug for NodeMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetricsCollector")
            .field("config", &self.config)
            .field("nodes", &self.lock().len())
            .finish()
    }
}

impl Default for NodeMetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl NodeMetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            nodes: Mutex::new(HashMap::new()),
            on_failure_rate: None,
            on_latency: None,
        }
    }

    pub fn with_failure_rate_callback(mut self, callback: OnFailureRate) -> Self {
        self.on_failure_rate = Some(callback);
        self
    }

    pub fn with_latency_callback(mut self, callback: OnLatency) -> Self {
        self.on_latency = Some(callback);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, NodeEntry>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to the node's entry and collect threshold breaches.
    fn update<F>(&self, node_name: &str, f: F) -> Breaches
    where
        F: FnOnce(&mut NodeEntry),
    {
        let mut nodes = self.lock();
        let entry = nodes
            .entry(node_name.to_string())
            .or_insert_with(|| NodeEntry::new(self.config.window_size));
        f(entry);

        let mut breaches = Breaches::default();
        if let Some(threshold) = self.config.failure_rate_threshold {
            if entry.total_executions > 0 {
                let rate = entry.failure_count as f64 / entry.total_executions as f64;
                if rate > threshold {
                    breaches.failure_rate = Some(rate);
                }
            }
        }
        if let Some(threshold) = self.config.latency_threshold_ms {
            if let Some(p99) = entry.window.percentiles(&[99])[0] {
                if p99 > threshold {
                    breaches.p99_ms = Some(p99);
                }
            }
        }
        breaches
    }

    fn report(&self, node_name: &str, breaches: Breaches) {
        if let (Some(rate), Some(callback)) = (breaches.failure_rate, &self.on_failure_rate) {
            debug!(node = node_name, rate, "Failure rate threshold exceeded");
            run_hook("on_failure_rate", node_name, || callback(node_name, rate));
        }
        if let (Some(p99), Some(callback)) = (breaches.p99_ms, &self.on_latency) {
            debug!(node = node_name, p99_ms = p99, "Latency threshold exceeded");
            run_hook("on_latency", node_name, || callback(node_name, p99));
        }
    }

    /// Metrics for one node; all-zero defaults when the node has no records.
    pub fn node_metrics(&self, node_name: &str) -> NodeMetrics {
        self.lock()
            .get(node_name)
            .map(NodeEntry::snapshot)
            .unwrap_or_default()
    }

    pub fn all_metrics(&self) -> BTreeMap<String, NodeMetrics> {
        self.lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.snapshot()))
            .collect()
    }

    /// Clear one node's metrics, or every node's when `node_name` is `None`.
    pub fn reset(&self, node_name: Option<&str>) {
        let mut nodes = self.lock();
        match node_name {
            Some(name) => {
                nodes.remove(name);
            }
            None => nodes.clear(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.all_metrics()).unwrap_or(serde_json::Value::Null)
    }
}

impl MetricsCollector for NodeMetricsCollector {
    fn record_success(&self, node_name: &str, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        let breaches = self.update(node_name, |entry| {
            entry.success_count += 1;
            entry.record_execution(duration_ms);
        });
        self.report(node_name, breaches);
    }

    fn record_failure(
        &self,
        node_name: &str,
        duration: Duration,
        _error: &NodeError,
        category: ErrorCategory,
    ) {
        let duration_ms = duration.as_millis() as u64;
        let breaches = self.update(node_name, |entry| {
            entry.failure_count += 1;
            *entry.errors_by_category.entry(category).or_insert(0) += 1;
            entry.record_execution(duration_ms);
        });
        self.report(node_name, breaches);
    }

    fn record_retry(&self, node_name: &str, _attempt: u32) {
        self.update(node_name, |entry| entry.retry_count += 1);
    }
}
