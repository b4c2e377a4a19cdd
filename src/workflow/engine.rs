//! Workflow engine
//!
//! Drives one session through the investigation phases. Each phase authorizes
//! its targets, delegates, stores the resulting envelopes on the session, and
//! lets the phase's quality gate decide what happens next. Phases run
//! sequentially within a session; independent sessions share nothing mutable.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context::RequestScope;
use crate::delegate::{DelegationClient, ResultEnvelope};
use crate::error::Result;
use crate::intent::IntentRouter;
use crate::planner::{Plan, Planner};
use crate::policy::PolicyClient;
use crate::progress::Severity;
use crate::registry::{CapabilityId, CapabilityRegistry};
use crate::report::summarize_payload;
use crate::workflow::gates::{self, GateDecision};
use crate::workflow::session::{Phase, Session, SessionError};

/// Resolution -> Analysis resumes allowed per session
pub const MAX_RESUMES: u32 = 1;
/// Gate-requested retries allowed per phase
pub const MAX_PHASE_RETRIES: u32 = 1;
/// Capabilities the routing phase fans out to at most
pub const MAX_ROUTING_TARGETS: usize = 2;

pub struct WorkflowEngine {
    registry: Arc<CapabilityRegistry>,
    policy: PolicyClient,
    delegate: DelegationClient,
    planner: Planner,
    intent: IntentRouter,
    reporting_capability: CapabilityId,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        policy: PolicyClient,
        delegate: DelegationClient,
        planner: Planner,
        intent: IntentRouter,
        reporting_capability: CapabilityId,
    ) -> Self {
        Self {
            registry,
            policy,
            delegate,
            planner,
            intent,
            reporting_capability,
        }
    }

    /// Drive `session` to a terminal phase. Must run inside a request scope;
    /// the only error that escapes is `ContextMissing`.
    ///
    /// Cancellation is cooperative: the token is checked between phases only,
    /// so an in-flight delegation always completes (its result is discarded
    /// with the session).
    pub async fn run(&self, session: &mut Session, cancel: &CancellationToken) -> Result<()> {
        let scope = RequestScope::current()?;

        loop {
            let phase = session.phase;
            if phase.is_terminal() {
                break;
            }
            if cancel.is_cancelled() {
                scope.emit(phase.as_str(), Severity::Warning, "session cancelled");
                session.cancel();
                break;
            }

            scope.emit(
                phase.as_str(),
                Severity::Info,
                format!("phase {} started", phase.as_str()),
            );

            let decision = self.execute_phase(session, phase).await?;
            if session.phase.is_terminal() {
                break;
            }

            self.apply(session, phase, decision, &scope);
        }

        match (&session.phase, &session.error) {
            (Phase::Done, _) => {
                scope.emit("done", Severity::Info, "investigation complete");
            }
            (_, Some(error)) => {
                scope.emit(
                    "failed",
                    Severity::Error,
                    format!("investigation ended: {:?}", error),
                );
            }
            _ => {}
        }

        Ok(())
    }

    fn apply(
        &self,
        session: &mut Session,
        phase: Phase,
        decision: GateDecision,
        scope: &RequestScope,
    ) {
        match decision {
            GateDecision::Proceed => {
                if let Some(next) = phase.next() {
                    if let Err(e) = session.transition(next) {
                        session.fail_gate(e);
                        return;
                    }
                    session.phase_retries = 0;
                    scope.emit(
                        next.as_str(),
                        Severity::Info,
                        format!("gate passed: {} -> {}", phase.as_str(), next.as_str()),
                    );
                }
            }
            GateDecision::RetryPhase => {
                if session.phase_retries >= MAX_PHASE_RETRIES {
                    let reason = format!("{} gate exhausted its retry budget", phase.as_str());
                    scope.emit(phase.as_str(), Severity::Error, reason.clone());
                    session.fail_gate(reason);
                } else {
                    session.phase_retries += 1;
                    scope.emit(
                        phase.as_str(),
                        Severity::Warning,
                        format!(
                            "gate requested a retry of {} ({}/{})",
                            phase.as_str(),
                            session.phase_retries,
                            MAX_PHASE_RETRIES
                        ),
                    );
                }
            }
            GateDecision::ResumeEarlier(target) => {
                if session.resumes >= MAX_RESUMES {
                    let reason = "resume budget exhausted, resolution stays insufficient";
                    scope.emit(phase.as_str(), Severity::Error, reason);
                    session.fail_gate(reason);
                } else if let Err(e) = session.transition(target) {
                    session.fail_gate(e);
                } else {
                    session.resumes += 1;
                    session.phase_retries = 0;
                    scope.emit(
                        target.as_str(),
                        Severity::Warning,
                        format!(
                            "gate resumed {} from {} ({}/{})",
                            target.as_str(),
                            phase.as_str(),
                            session.resumes,
                            MAX_RESUMES
                        ),
                    );
                }
            }
            GateDecision::Abort(reason) => {
                scope.emit(phase.as_str(), Severity::Error, reason.clone());
                session.fail_gate(reason);
            }
        }
    }

    async fn execute_phase(&self, session: &mut Session, phase: Phase) -> Result<GateDecision> {
        match phase {
            Phase::Planning => self.run_planning(session).await,
            Phase::Routing => self.run_routing(session).await,
            Phase::Analysis => self.run_analysis(session).await,
            Phase::Resolution => self.run_resolution(session).await,
            Phase::Documentation => self.run_documentation(session).await,
            Phase::Done | Phase::Failed => Ok(GateDecision::Proceed),
        }
    }

    async fn run_planning(&self, session: &mut Session) -> Result<GateDecision> {
        let scope = RequestScope::current()?;
        let plan = self
            .planner
            .plan(&session.request_text, &self.registry)
            .await;

        scope.emit(
            Phase::Planning.as_str(),
            Severity::Info,
            format!("plan ready: {} step(s) from {}", plan.steps.len(), plan.source),
        );

        let payload = serde_json::to_value(&plan).unwrap_or(Value::Null);
        session.plan = Some(plan);
        session.record(Phase::Planning, vec![ResultEnvelope::local("planner", payload)]);

        Ok(gates::evaluate(Phase::Planning, session))
    }

    async fn run_routing(&self, session: &mut Session) -> Result<GateDecision> {
        let scope = RequestScope::current()?;
        let phase = Phase::Routing;

        let primary = self.intent.classify(&session.request_text);
        scope.emit(
            phase.as_str(),
            Severity::Info,
            format!("request classified as {}", primary),
        );
        session.primary_capability = Some(primary.clone());

        let targets = routing_targets(&primary, session.plan.as_ref());

        let mut envelopes = Vec::new();
        let mut calls = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            let entry = self.registry.resolve(target);
            let decision = self.policy.authorize(&session.acting_user, &entry.id).await;
            if !decision.allow {
                scope.emit(
                    phase.as_str(),
                    Severity::Warning,
                    format!("policy denied {}: {}", entry.id, decision.reason),
                );
                if index == 0 {
                    // The primary route is refused: the request itself is not
                    // permitted, and no delegation is attempted for it.
                    session.fail(SessionError::PolicyDenied {
                        reason: decision.reason,
                    });
                    return Ok(GateDecision::Proceed);
                }
                envelopes.push(ResultEnvelope::denied(entry.id.clone(), decision.reason));
                continue;
            }
            calls.push((entry, routing_instruction(target, session)));
        }

        // Fan out to every authorized target and join before the gate runs.
        let results = join_all(
            calls
                .iter()
                .map(|(entry, instruction)| self.delegate.call(entry, instruction, phase.as_str())),
        )
        .await;
        for result in results {
            envelopes.push(result?);
        }

        session.record(phase, envelopes);
        Ok(gates::evaluate(phase, session))
    }

    async fn run_analysis(&self, session: &mut Session) -> Result<GateDecision> {
        let phase = Phase::Analysis;
        let steps = session
            .plan
            .as_ref()
            .map(|p| p.steps.clone())
            .unwrap_or_default();

        let mut envelopes = Vec::new();
        for step in &steps {
            let entry = self.registry.resolve(&step.capability);
            let decision = self.policy.authorize(&session.acting_user, &entry.id).await;
            if !decision.allow {
                envelopes.push(ResultEnvelope::denied(entry.id.clone(), decision.reason));
                continue;
            }
            let envelope = self
                .delegate
                .call(entry, &step.instruction, phase.as_str())
                .await?;
            envelopes.push(envelope);
        }

        session.record(phase, envelopes);
        Ok(gates::evaluate(phase, session))
    }

    async fn run_resolution(&self, session: &mut Session) -> Result<GateDecision> {
        let phase = Phase::Resolution;
        let target = session
            .primary_capability
            .clone()
            .unwrap_or_else(|| self.registry.default_id().clone());
        let entry = self.registry.resolve(&target);

        let decision = self.policy.authorize(&session.acting_user, &entry.id).await;
        let envelope = if !decision.allow {
            ResultEnvelope::denied(entry.id.clone(), decision.reason)
        } else {
            let instruction = resolution_instruction(session);
            self.delegate
                .call(entry, &instruction, phase.as_str())
                .await?
        };

        session.record(phase, vec![envelope]);
        Ok(gates::evaluate(phase, session))
    }

    async fn run_documentation(&self, session: &mut Session) -> Result<GateDecision> {
        let phase = Phase::Documentation;
        let entry = self.registry.resolve(&self.reporting_capability);

        let decision = self.policy.authorize(&session.acting_user, &entry.id).await;
        let envelope = if !decision.allow {
            ResultEnvelope::denied(entry.id.clone(), decision.reason)
        } else {
            let instruction = format!(
                "Archive the investigation report for session {}",
                session.id
            );
            self.delegate
                .call(entry, &instruction, phase.as_str())
                .await?
        };

        session.record(phase, vec![envelope]);
        Ok(gates::evaluate(phase, session))
    }
}

/// Targets of the routing fan-out: the classified capability first, then plan
/// capabilities not already included, capped at [`MAX_ROUTING_TARGETS`].
fn routing_targets(primary: &CapabilityId, plan: Option<&Plan>) -> Vec<CapabilityId> {
    let mut targets = vec![primary.clone()];
    if let Some(plan) = plan {
        for step in &plan.steps {
            if targets.len() >= MAX_ROUTING_TARGETS {
                break;
            }
            if !targets.contains(&step.capability) {
                targets.push(step.capability.clone());
            }
        }
    }
    targets
}

/// Instruction for one routing target: the plan step's instruction when the
/// plan names that capability, the raw request otherwise.
fn routing_instruction(target: &CapabilityId, session: &Session) -> String {
    session
        .plan
        .as_ref()
        .and_then(|plan| plan.steps.iter().find(|s| &s.capability == target))
        .map(|step| step.instruction.clone())
        .unwrap_or_else(|| session.request_text.clone())
}

/// Instruction for the resolution delegation, synthesized from the request
/// and the successful analysis findings.
fn resolution_instruction(session: &Session) -> String {
    let findings: Vec<String> = session
        .output(Phase::Analysis)
        .map(|output| {
            output
                .envelopes
                .iter()
                .filter(|e| e.success)
                .map(|e| summarize_payload(&e.payload))
                .collect()
        })
        .unwrap_or_default();

    if findings.is_empty() {
        format!("Apply a remediation for: {}", session.request_text)
    } else {
        format!(
            "Apply a remediation for: {}. Analysis findings: {}",
            session.request_text,
            findings.join("; ")
        )
    }
}
