//! Phase-gated investigation workflow
//!
//! The state machine that drives one session from planning through
//! documentation, with quality gates deciding at every phase boundary whether
//! to proceed, retry, resume earlier analysis, or abort.

pub mod engine;
pub mod gates;
pub mod session;

pub use engine::{WorkflowEngine, MAX_PHASE_RETRIES, MAX_RESUMES};
pub use gates::GateDecision;
pub use session::{Phase, PhaseOutput, Session, SessionError};
