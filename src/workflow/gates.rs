//! Quality gates
//!
//! A gate is a pure, synchronous predicate over the session's accumulated
//! outputs, evaluated at a phase boundary. Gates never trigger remote calls;
//! retry and resume budgets are enforced by the engine, not here.

use crate::delegate::ErrorClass;
use crate::report::extract_confidence;
use crate::workflow::session::{Phase, Session};

/// A resolution whose declared confidence is below this warrants more analysis
pub const LOW_CONFIDENCE: f64 = 0.5;

/// Verdict of a quality gate
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Proceed,
    RetryPhase,
    ResumeEarlier(Phase),
    Abort(String),
}

/// Evaluate the gate guarding the boundary after `phase`.
pub fn evaluate(phase: Phase, session: &Session) -> GateDecision {
    match phase {
        Phase::Planning => planning_gate(session),
        Phase::Routing => routing_gate(session),
        Phase::Analysis => analysis_gate(session),
        Phase::Resolution => resolution_gate(session),
        // A lost report is surfaced in the response, never fatal
        Phase::Documentation => GateDecision::Proceed,
        Phase::Done | Phase::Failed => GateDecision::Proceed,
    }
}

fn planning_gate(session: &Session) -> GateDecision {
    match &session.plan {
        Some(plan) if !plan.steps.is_empty() => GateDecision::Proceed,
        _ => GateDecision::Abort("planning produced no usable plan".to_string()),
    }
}

/// Routing fans out to several capabilities; any success is enough to go on.
fn routing_gate(session: &Session) -> GateDecision {
    if session.successes(Phase::Routing) > 0 {
        GateDecision::Proceed
    } else {
        GateDecision::Abort("all routing delegations failed".to_string())
    }
}

fn analysis_gate(session: &Session) -> GateDecision {
    if session.successes(Phase::Analysis) > 0 {
        GateDecision::Proceed
    } else {
        GateDecision::RetryPhase
    }
}

fn resolution_gate(session: &Session) -> GateDecision {
    let Some(output) = session.output(Phase::Resolution) else {
        return GateDecision::RetryPhase;
    };
    let Some(latest) = output.envelopes.last() else {
        return GateDecision::RetryPhase;
    };

    if latest.error == Some(ErrorClass::PolicyDenied) {
        return GateDecision::Abort(
            latest
                .detail
                .clone()
                .unwrap_or_else(|| "resolution delegation denied".to_string()),
        );
    }

    if !latest.success {
        return GateDecision::RetryPhase;
    }

    match extract_confidence(&latest.payload) {
        Some(confidence) if confidence < LOW_CONFIDENCE => {
            GateDecision::ResumeEarlier(Phase::Analysis)
        }
        _ => GateDecision::Proceed,
    }
}
