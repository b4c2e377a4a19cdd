//! Session state for one end-to-end investigation
//!
//! A session is owned exclusively by the workflow instance driving it; other
//! components only ever see it read-only. Phase transitions are guarded here
//! so an invalid edge is a programming error surfaced at the call site.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delegate::ResultEnvelope;
use crate::planner::Plan;
use crate::registry::CapabilityId;

/// Workflow phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Routing,
    Analysis,
    Resolution,
    Documentation,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Routing => "routing",
            Phase::Analysis => "analysis",
            Phase::Resolution => "resolution",
            Phase::Documentation => "documentation",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }

    /// The forward successor, if any
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Planning => Some(Phase::Routing),
            Phase::Routing => Some(Phase::Analysis),
            Phase::Analysis => Some(Phase::Resolution),
            Phase::Resolution => Some(Phase::Documentation),
            Phase::Documentation => Some(Phase::Done),
            Phase::Done | Phase::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planning" => Ok(Phase::Planning),
            "routing" => Ok(Phase::Routing),
            "analysis" => Ok(Phase::Analysis),
            "resolution" => Ok(Phase::Resolution),
            "documentation" => Ok(Phase::Documentation),
            "done" => Ok(Phase::Done),
            "failed" => Ok(Phase::Failed),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// Why a session ended without completing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionError {
    /// The policy gate refused the phase's sole target
    PolicyDenied { reason: String },
    /// A quality gate aborted the workflow
    GateAbort { reason: String },
    /// Cancelled between phases
    Cancelled,
}

/// Envelopes collected during one phase (retries append to the same entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub phase: Phase,
    pub envelopes: Vec<ResultEnvelope>,
}

/// One end-to-end user interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub acting_user: String,
    pub request_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_ref: Option<String>,
    pub phase: Phase,
    /// Ordered mapping from phase to collected envelopes
    pub outputs: Vec<PhaseOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    /// Capability the intent router selected during routing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_capability: Option<CapabilityId>,
    /// Resolution -> Analysis resumes taken so far
    pub resumes: u32,
    /// Gate-requested retries of the current phase
    pub phase_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        acting_user: impl Into<String>,
        request_text: impl Into<String>,
        repository_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            acting_user: acting_user.into(),
            request_text: request_text.into(),
            repository_ref,
            phase: Phase::Planning,
            outputs: Vec::new(),
            plan: None,
            primary_capability: None,
            resumes: 0,
            phase_retries: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append envelopes under `phase`, merging with an existing entry when the
    /// phase already produced output (retry or resume).
    pub fn record(&mut self, phase: Phase, envelopes: Vec<ResultEnvelope>) {
        self.updated_at = Utc::now();
        if let Some(output) = self.outputs.iter_mut().find(|o| o.phase == phase) {
            output.envelopes.extend(envelopes);
        } else {
            self.outputs.push(PhaseOutput { phase, envelopes });
        }
    }

    pub fn output(&self, phase: Phase) -> Option<&PhaseOutput> {
        self.outputs.iter().find(|o| o.phase == phase)
    }

    /// Count of successful envelopes collected for `phase`
    pub fn successes(&self, phase: Phase) -> usize {
        self.output(phase)
            .map(|o| o.envelopes.iter().filter(|e| e.success).count())
            .unwrap_or(0)
    }

    /// Move to `next`. Only forward edges, the single resume edge
    /// (resolution -> analysis) and edges into `Failed` are legal.
    pub fn transition(&mut self, next: Phase) -> Result<(), String> {
        let legal = next == Phase::Failed && !self.phase.is_terminal()
            || self.phase.next() == Some(next)
            || (self.phase == Phase::Resolution && next == Phase::Analysis);

        if !legal {
            return Err(format!(
                "illegal transition: {} -> {}",
                self.phase.as_str(),
                next.as_str()
            ));
        }
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, error: SessionError) {
        self.error = Some(error);
        self.phase = Phase::Failed;
        self.updated_at = Utc::now();
    }

    pub fn fail_gate(&mut self, reason: impl Into<String>) {
        self.fail(SessionError::GateAbort {
            reason: reason.into(),
        });
    }

    pub fn cancel(&mut self) {
        self.fail(SessionError::Cancelled);
    }
}
