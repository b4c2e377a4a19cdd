//! Planner - turns a request into an ordered execution plan
//!
//! Plan generation backends are tried in order with a bounded timeout each.
//! Whatever shape a backend returns (a single step object or an array of
//! steps) is normalized to a step sequence; an empty sequence counts as a
//! backend failure. When every backend fails, the planner falls back to a
//! deterministic single-step plan so the workflow never stalls on "no plan".

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::PlannerBackendConfig;
use crate::registry::{CapabilityId, CapabilityRegistry};

/// Plan source name used when every backend failed
pub const FALLBACK_SOURCE: &str = "fallback";

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub capability: CapabilityId,
    pub instruction: String,
}

/// Ordered execution plan; always has at least one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Backend that produced the plan, or [`FALLBACK_SOURCE`]
    pub source: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// The deterministic plan of last resort: one step targeting the default
    /// capability with the raw request text as its instruction.
    pub fn fallback(request: &str, default_capability: CapabilityId) -> Self {
        Self {
            source: FALLBACK_SOURCE.to_string(),
            steps: vec![PlanStep {
                capability: default_capability,
                instruction: request.to_string(),
            }],
        }
    }
}

/// A plan generation backend
#[async_trait]
pub trait PlanBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Propose steps for `request`. Any failure (transport, malformed output,
    /// empty output) is reported as a string so the planner can fall through.
    async fn propose(
        &self,
        request: &str,
        registry: &CapabilityRegistry,
    ) -> std::result::Result<Vec<PlanStep>, String>;
}

/// HTTP plan backend: posts the request plus the capability directory and
/// normalizes whatever comes back
pub struct HttpPlanBackend {
    name: String,
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpPlanBackend {
    pub fn new(config: &PlannerBackendConfig, timeout: Duration) -> Self {
        Self {
            name: config.name.clone(),
            client: Client::new(),
            url: config.url.clone(),
            timeout,
        }
    }
}

#[async_trait]
impl PlanBackend for HttpPlanBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn propose(
        &self,
        request: &str,
        registry: &CapabilityRegistry,
    ) -> std::result::Result<Vec<PlanStep>, String> {
        let capabilities: Vec<&str> = registry.iter().map(|e| e.id.as_str()).collect();
        let body = serde_json::json!({
            "request": request,
            "capabilities": capabilities,
        });

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("backend returned {}", response.status()));
        }

        let value: Value = response.json().await.map_err(|e| e.to_string())?;
        normalize_steps(value)
    }
}

/// Normalize backend output to a non-empty step sequence.
///
/// Accepts either a single step object or an array of steps; anything else,
/// or an empty array, is a failure.
pub(crate) fn normalize_steps(value: Value) -> std::result::Result<Vec<PlanStep>, String> {
    let steps = match value {
        Value::Array(items) => items
            .into_iter()
            .map(parse_step)
            .collect::<std::result::Result<Vec<_>, _>>()?,
        object @ Value::Object(_) => vec![parse_step(object)?],
        other => return Err(format!("unexpected plan shape: {}", other)),
    };

    if steps.is_empty() {
        return Err("backend returned an empty plan".to_string());
    }
    Ok(steps)
}

fn parse_step(value: Value) -> std::result::Result<PlanStep, String> {
    serde_json::from_value(value).map_err(|e| format!("malformed plan step: {}", e))
}

/// Fallback-chain planner over an ordered list of backends
pub struct Planner {
    backends: Vec<Box<dyn PlanBackend>>,
    default_capability: CapabilityId,
}

impl Planner {
    pub fn new(backends: Vec<Box<dyn PlanBackend>>, default_capability: CapabilityId) -> Self {
        Self {
            backends,
            default_capability,
        }
    }

    pub fn from_configs(
        configs: &[PlannerBackendConfig],
        timeout: Duration,
        default_capability: CapabilityId,
    ) -> Self {
        let backends = configs
            .iter()
            .map(|c| Box::new(HttpPlanBackend::new(c, timeout)) as Box<dyn PlanBackend>)
            .collect();
        Self::new(backends, default_capability)
    }

    /// Produce a plan. Never fails and never returns an empty plan: backends
    /// are tried in order and the deterministic fallback terminates the chain.
    pub async fn plan(&self, request: &str, registry: &CapabilityRegistry) -> Plan {
        for backend in &self.backends {
            match backend.propose(request, registry).await {
                Ok(steps) => {
                    tracing::debug!(
                        backend = backend.name(),
                        steps = steps.len(),
                        "plan backend succeeded"
                    );
                    return Plan {
                        source: backend.name().to_string(),
                        steps,
                    };
                }
                Err(reason) => {
                    tracing::warn!(backend = backend.name(), %reason, "plan backend failed");
                }
            }
        }

        tracing::warn!("all plan backends failed, using deterministic fallback");
        Plan::fallback(request, self.default_capability.clone())
    }
}
