//! Policy gate client
//!
//! Single round trip to the external policy evaluator per authorization.
//! Decisions are never cached: role bindings can change between calls within
//! one session, so every delegation attempt re-evaluates. Any transport
//! failure or non-2xx response is treated as a denial (fail-closed).

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::registry::CapabilityId;

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    pub reason: String,
    pub user: String,
    pub target: CapabilityId,
}

#[derive(Debug, Serialize)]
struct GateRequest<'a> {
    user: &'a str,
    target_capability: &'a str,
}

#[derive(Debug, Deserialize)]
struct GateResponse {
    allow: bool,
    #[serde(default)]
    reason: String,
}

/// Client for the external policy evaluator
pub struct PolicyClient {
    client: Client,
    gate_url: String,
}

impl PolicyClient {
    pub fn new(gate_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            gate_url: gate_url.into(),
        }
    }

    /// Evaluate whether `user` may delegate to `target`. Never errors: an
    /// unreachable or misbehaving gate yields a denial.
    pub async fn authorize(&self, user: &str, target: &CapabilityId) -> Decision {
        let request = GateRequest {
            user,
            target_capability: target.as_str(),
        };

        let response = match self
            .client
            .post(&self.gate_url)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(user, target = %target, "policy gate unreachable: {}", e);
                return Self::unavailable(user, target, e.to_string());
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(user, target = %target, "policy gate returned {}", status);
            return Self::unavailable(user, target, format!("status {}", status));
        }

        match response.json::<GateResponse>().await {
            Ok(body) => Decision {
                allow: body.allow,
                reason: body.reason,
                user: user.to_string(),
                target: target.clone(),
            },
            Err(e) => {
                tracing::warn!(user, target = %target, "policy gate response malformed: {}", e);
                Self::unavailable(user, target, e.to_string())
            }
        }
    }

    fn unavailable(user: &str, target: &CapabilityId, detail: String) -> Decision {
        Decision {
            allow: false,
            reason: format!("policy gate unavailable: {}", detail),
            user: user.to_string(),
            target: target.clone(),
        }
    }
}
