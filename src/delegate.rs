//! Delegation client - remote calls to capability workers
//!
//! Every outcome is captured in a [`ResultEnvelope`]; transport and protocol
//! failures never escape this module as errors. Transient failures (timeout,
//! connect, 5xx) are retried up to the attempt cap with capped exponential
//! backoff; permanent failures (4xx, malformed body) get exactly one attempt.
//! Each attempt publishes a progress event so observers see retry activity.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::config::DelegationTuning;
use crate::context::RequestScope;
use crate::error::Result;
use crate::progress::Severity;
use crate::registry::{CapabilityEntry, CapabilityId};

/// Classification of a failed delegation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeout, connection refused, 5xx: worth retrying
    Transient,
    /// 4xx or malformed response: retrying cannot help
    Permanent,
    /// The policy gate refused the delegation
    PolicyDenied,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::PolicyDenied => "policy_denied",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Normalized outcome of one delegation, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub capability: CapabilityId,
    pub success: bool,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

impl ResultEnvelope {
    /// Envelope for a delegation the policy gate refused; no attempt is made.
    pub fn denied(capability: CapabilityId, reason: impl Into<String>) -> Self {
        Self {
            capability,
            success: false,
            payload: Value::Null,
            error: Some(ErrorClass::PolicyDenied),
            detail: Some(reason.into()),
            elapsed_ms: 0,
            attempts: 0,
        }
    }

    /// Envelope for an in-process step (e.g. the planner) that produced
    /// `payload` without a remote call.
    pub fn local(source: impl Into<String>, payload: Value) -> Self {
        Self {
            capability: CapabilityId::new(source),
            success: true,
            payload,
            error: None,
            detail: None,
            elapsed_ms: 0,
            attempts: 1,
        }
    }
}

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    instruction: &'a str,
    session_id: &'a str,
    acting_user: &'a str,
}

#[derive(Debug, Deserialize)]
struct WorkerResponse {
    success: bool,
    #[serde(default)]
    payload: Value,
}

/// Client for delegating work to capability workers
pub struct DelegationClient {
    client: Client,
    max_attempts: u32,
    timeout: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl DelegationClient {
    pub fn new(tuning: &DelegationTuning) -> Self {
        Self {
            client: Client::new(),
            max_attempts: tuning.max_attempts.max(1),
            timeout: tuning.timeout(),
            backoff_base: tuning.backoff_base(),
            backoff_cap: tuning.backoff_cap(),
        }
    }

    /// Delegate `instruction` to the worker behind `entry`.
    ///
    /// Must run inside a request scope; the only error this returns is
    /// `ContextMissing`. All delegation failures land in the envelope.
    pub async fn call(
        &self,
        entry: &CapabilityEntry,
        instruction: &str,
        phase: &str,
    ) -> Result<ResultEnvelope> {
        let scope = RequestScope::current()?;
        let started = Instant::now();
        let mut last_failure: Option<(ErrorClass, String)> = None;
        let mut attempts = 0;

        for attempt in 1..=self.max_attempts {
            attempts = attempt;
            scope.emit(
                phase,
                Severity::Info,
                format!(
                    "delegating to {} (attempt {}/{})",
                    entry.id, attempt, self.max_attempts
                ),
            );

            match self.attempt(entry, instruction, &scope).await {
                Ok(worker) => {
                    scope.emit(
                        phase,
                        if worker.success {
                            Severity::Info
                        } else {
                            Severity::Warning
                        },
                        format!(
                            "{} finished on attempt {} (success: {})",
                            entry.id, attempt, worker.success
                        ),
                    );
                    return Ok(ResultEnvelope {
                        capability: entry.id.clone(),
                        success: worker.success,
                        payload: worker.payload,
                        error: None,
                        detail: None,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        attempts,
                    });
                }
                Err((class, detail)) => {
                    scope.emit(
                        phase,
                        Severity::Warning,
                        format!(
                            "{} failed on attempt {}: {} ({})",
                            entry.id,
                            attempt,
                            detail,
                            class.as_str()
                        ),
                    );
                    let retry = class.is_retryable() && attempt < self.max_attempts;
                    last_failure = Some((class, detail));
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }

        let (class, detail) = last_failure.expect("at least one attempt was made");
        scope.emit(
            phase,
            Severity::Error,
            format!(
                "{} exhausted after {} attempt(s): {}",
                entry.id, attempts, detail
            ),
        );

        Ok(ResultEnvelope {
            capability: entry.id.clone(),
            success: false,
            payload: Value::Null,
            error: Some(class),
            detail: Some(detail),
            elapsed_ms: started.elapsed().as_millis() as u64,
            attempts,
        })
    }

    async fn attempt(
        &self,
        entry: &CapabilityEntry,
        instruction: &str,
        scope: &RequestScope,
    ) -> std::result::Result<WorkerResponse, (ErrorClass, String)> {
        let request = WorkerRequest {
            instruction,
            session_id: &scope.session_id,
            acting_user: &scope.acting_user,
        };

        let response = self
            .client
            .post(&entry.address)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_server_error() {
            return Err((
                ErrorClass::Transient,
                format!("{} returned {}", entry.id, status),
            ));
        }
        if status.is_client_error() {
            return Err((
                ErrorClass::Permanent,
                format!("{} returned {}", entry.id, status),
            ));
        }

        response
            .json::<WorkerResponse>()
            .await
            .map_err(|e| (ErrorClass::Permanent, format!("malformed response: {}", e)))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

fn classify_transport(e: reqwest::Error) -> (ErrorClass, String) {
    if e.is_timeout() {
        (ErrorClass::Transient, "request timed out".to_string())
    } else if e.is_connect() {
        (ErrorClass::Transient, format!("connection failed: {}", e))
    } else if e.is_decode() {
        (ErrorClass::Permanent, format!("malformed response: {}", e))
    } else {
        (ErrorClass::Transient, e.to_string())
    }
}
