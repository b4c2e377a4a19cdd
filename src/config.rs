//! Server configuration
//!
//! One JSON file describes the capability registry, the ordered intent rules,
//! the policy gate endpoint, and the planner backend chain. Loaded once at
//! process start; a broken configuration is fatal.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::intent::IntentRule;
use crate::registry::{CapabilityEntry, CapabilityId, CapabilityRegistry};

/// Retry and timeout tuning for remote calls
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelegationTuning {
    /// Attempt cap per delegation, including the first attempt
    pub max_attempts: u32,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Base backoff between attempts in milliseconds (doubles per attempt)
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds
    pub backoff_cap_ms: u64,
    /// Per-backend planner timeout in milliseconds
    pub planner_timeout_ms: u64,
}

impl Default for DelegationTuning {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 10_000,
            backoff_base_ms: 200,
            backoff_cap_ms: 5_000,
            planner_timeout_ms: 8_000,
        }
    }
}

impl DelegationTuning {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_millis(self.planner_timeout_ms)
    }
}

/// One plan generation backend, tried in configuration order
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerBackendConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Worker services requests can be delegated to
    pub capabilities: Vec<CapabilityEntry>,
    /// Capability used when nothing else matches
    pub default_capability: CapabilityId,
    /// Ordered intent rules; order is significant (first match wins)
    #[serde(default)]
    pub intent_rules: Vec<IntentRule>,
    /// Policy gate endpoint
    pub policy_gate_url: String,
    /// Plan generation backends: primary first, then fallbacks
    #[serde(default)]
    pub planner_backends: Vec<PlannerBackendConfig>,
    /// Capability the documentation phase stores reports through; falls back
    /// to the default capability
    pub reporting_capability: Option<CapabilityId>,
    #[serde(default)]
    pub delegation: DelegationTuning,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.policy_gate_url.is_empty() {
            return Err(AppError::Config("policy_gate_url must be set".to_string()));
        }
        for rule in &self.intent_rules {
            if rule.keywords.is_empty() {
                return Err(AppError::Config(format!(
                    "intent rule for {} has no keywords",
                    rule.capability
                )));
            }
        }
        Ok(())
    }

    /// Build the immutable registry snapshot shared across sessions.
    pub fn registry(&self) -> Result<CapabilityRegistry> {
        CapabilityRegistry::new(self.capabilities.clone(), self.default_capability.clone())
    }

    pub fn reporting_capability(&self) -> CapabilityId {
        self.reporting_capability
            .clone()
            .unwrap_or_else(|| self.default_capability.clone())
    }
}
