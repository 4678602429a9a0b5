use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Retry policy for a single node. Immutable once the node is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Per-attempt deadline. 0 disables the timer.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_ms: default_timeout_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_max_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 1000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_max_backoff_ms() -> u64 { 10_000 }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_jitter_factor() -> f64 { 0.1 }

impl RetryConfig {
    /// Single attempt, no timeout. For non-idempotent or validation-only nodes.
    pub fn simple() -> Self {
        Self {
            max_attempts: 1,
            timeout_ms: 0,
            ..Default::default()
        }
    }

    /// Slow, flaky external model calls.
    pub fn llm() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 2000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 60_000,
            timeout_ms: 60_000,
            jitter_factor: 0.25,
        }
    }

    /// Fast external API and tool calls.
    pub fn tool() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            timeout_ms: 10_000,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::InvalidRetry(
                "maxAttempts must be at least 1".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(ConfigError::InvalidRetry(format!(
                "backoffMultiplier must be a positive number, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetry(format!(
                "jitterFactor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Circuit breaker knobs for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 { 5 }
fn default_recovery_timeout_ms() -> u64 { 60_000 }

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold < 1 {
            return Err(ConfigError::InvalidCircuitBreaker(
                "failureThreshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Named retry presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Simple,
    Llm,
    Tool,
}

impl Preset {
    pub fn retry_config(&self) -> RetryConfig {
        match self {
            Self::Simple => RetryConfig::simple(),
            Self::Llm => RetryConfig::llm(),
            Self::Tool => RetryConfig::tool(),
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "llm" => Ok(Self::Llm),
            "tool" => Ok(Self::Tool),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }
}

/// Field-by-field overrides applied on top of a preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub jitter_factor: Option<f64>,
}

impl RetryOverrides {
    pub fn apply_to(&self, mut base: RetryConfig) -> RetryConfig {
        if let Some(v) = self.max_attempts {
            base.max_attempts = v;
        }
        if let Some(v) = self.backoff_ms {
            base.backoff_ms = v;
        }
        if let Some(v) = self.backoff_multiplier {
            base.backoff_multiplier = v;
        }
        if let Some(v) = self.max_backoff_ms {
            base.max_backoff_ms = v;
        }
        if let Some(v) = self.timeout_ms {
            base.timeout_ms = v;
        }
        if let Some(v) = self.jitter_factor {
            base.jitter_factor = v;
        }
        base
    }
}

/// Policy entry for one node in a policy file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePolicy {
    #[serde(default)]
    pub preset: Option<Preset>,
    #[serde(default)]
    pub retry: Option<RetryOverrides>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl NodePolicy {
    /// Effective retry config: preset (or default) with overrides applied.
    pub fn retry_config(&self) -> RetryConfig {
        let base = self
            .preset
            .map(|p| p.retry_config())
            .unwrap_or_default();
        match &self.retry {
            Some(overrides) => overrides.apply_to(base),
            None => base,
        }
    }
}

/// Per-node execution policies, typically loaded from `nodes.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy applied to nodes without an explicit entry.
    #[serde(default)]
    pub defaults: NodePolicy,
    #[serde(default)]
    pub nodes: HashMap<String, NodePolicy>,
}

impl PolicyConfig {
    /// Load policies from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Policy for a node, falling back to `defaults`.
    pub fn policy_for(&self, node_name: &str) -> &NodePolicy {
        self.nodes.get(node_name).unwrap_or(&self.defaults)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let entries = std::iter::once(&self.defaults).chain(self.nodes.values());
        for policy in entries {
            policy.retry_config().validate()?;
            if let Some(cb) = &policy.circuit_breaker {
                cb.validate()?;
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string. Unset variables are kept verbatim.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
