//! Response builder
//!
//! Deterministic assembly of the final report from a session's accumulated
//! phase outputs. Building is side-effect free and idempotent: the same
//! session yields byte-identical reports, which makes re-rendering an
//! archived session safe.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::session::{Phase, Session, SessionError};

/// Confidence values above 1 up to this bound are read as percentages
const PERCENT_BOUND: f64 = 100.0;

/// Maximum length of a single finding line lifted from a payload
const FINDING_LIMIT: usize = 200;

/// Final user-facing report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub session_id: String,
    pub headline: String,
    pub phases: Vec<PhaseSummary>,
    /// Mean of the confidence scores declared by worker outputs; `None` when
    /// no output declared one ("unknown confidence", not an error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Digest of one phase's collected envelopes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub succeeded: usize,
    pub failed: usize,
    pub findings: Vec<String>,
}

/// Build the report for `session`. Pure function of the session's state.
pub fn build(session: &Session) -> Report {
    let phases = session
        .outputs
        .iter()
        .map(|output| {
            let succeeded = output.envelopes.iter().filter(|e| e.success).count();
            let failed = output.envelopes.len() - succeeded;
            let findings = output
                .envelopes
                .iter()
                .map(|envelope| {
                    if envelope.success {
                        format!("{}: {}", envelope.capability, summarize_payload(&envelope.payload))
                    } else {
                        format!(
                            "{}: failed ({})",
                            envelope.capability,
                            envelope
                                .detail
                                .as_deref()
                                .unwrap_or("worker reported failure")
                        )
                    }
                })
                .collect();

            PhaseSummary {
                phase: output.phase,
                succeeded,
                failed,
                findings,
            }
        })
        .collect();

    let confidences: Vec<f64> = session
        .outputs
        .iter()
        .flat_map(|o| o.envelopes.iter())
        .filter_map(|e| extract_confidence(&e.payload))
        .collect();
    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
    };

    Report {
        session_id: session.id.clone(),
        headline: headline(session),
        phases,
        confidence,
    }
}

fn headline(session: &Session) -> String {
    match (&session.phase, &session.error) {
        (Phase::Done, _) => format!("Investigation completed: {}", session.request_text),
        (_, Some(SessionError::PolicyDenied { reason })) => {
            format!("Investigation denied: {}", reason)
        }
        (_, Some(SessionError::GateAbort { reason })) => {
            format!("Investigation aborted: {}", reason)
        }
        (_, Some(SessionError::Cancelled)) => {
            format!("Investigation cancelled: {}", session.request_text)
        }
        _ => format!("Investigation in progress: {}", session.request_text),
    }
}

/// Lift a one-line summary out of a worker payload. Workers that follow the
/// convention put it under "summary"; anything else is rendered compactly.
pub(crate) fn summarize_payload(payload: &Value) -> String {
    if let Some(summary) = payload.get("summary").and_then(Value::as_str) {
        return truncate(summary);
    }
    if payload.is_null() {
        return "no payload".to_string();
    }
    truncate(&payload.to_string())
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= FINDING_LIMIT {
        s.to_string()
    } else {
        let cut: String = s.chars().take(FINDING_LIMIT).collect();
        format!("{}…", cut)
    }
}

/// Read a declared confidence score from a payload, normalizing percentages
/// to the unit interval. Absent or malformed values are `None`.
pub(crate) fn extract_confidence(payload: &Value) -> Option<f64> {
    let raw = payload.get("confidence")?.as_f64()?;
    if (0.0..=1.0).contains(&raw) {
        Some(raw)
    } else if raw > 1.0 && raw <= PERCENT_BOUND {
        Some(raw / PERCENT_BOUND)
    } else {
        None
    }
}
