//! Per-node circuit breaker.
//!
//! Two states: Closed and Open. Once the recovery timeout has elapsed an Open
//! breaker lets exactly one probe through. A failed probe re-opens the
//! breaker with a fresh window; a successful one closes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use nodeward_core::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStatus {
    pub failures: u32,
    pub state: CircuitState,
    pub time_until_recovery_ms: u64,
}

#[derive(Debug)]
struct BreakerInner {
    failures: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_issued: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                failures: 0,
                state: CircuitState::Closed,
                opened_at: None,
                probe_issued: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Counters stay meaningful even if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.config.recovery_timeout_ms)
    }

    /// Whether a real attempt may run now. Claims the probe when it grants one.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout() && !inner.probe_issued {
                    inner.probe_issued = true;
                    debug!(node = %self.name, "Circuit breaker allowing recovery probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        if inner.failures >= self.config.failure_threshold {
            if inner.state == CircuitState::Closed {
                warn!(
                    node = %self.name,
                    failures = inner.failures,
                    recovery_timeout_ms = self.config.recovery_timeout_ms,
                    "Circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_issued = false;
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            info!(node = %self.name, "Circuit breaker closed after successful probe");
        }
        inner.failures = 0;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.probe_issued = false;
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.lock();
        let time_until_recovery_ms = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .recovery_timeout()
                .saturating_sub(opened_at.elapsed())
                .as_millis() as u64,
            _ => 0,
        };
        CircuitBreakerStatus {
            failures: inner.failures,
            state: inner.state,
            time_until_recovery_ms,
        }
    }
}

/// Breakers keyed by node name. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<Mutex<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaker for `name`, created with `config` on first use.
    /// Later calls return the existing breaker and ignore `config`.
    pub fn get_or_create(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config.clone())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
