//! Progress event publishing
//!
//! Fire-and-forget progress events for the live observer stream. A failed
//! publish is logged and swallowed; losing a UI update must never abort an
//! in-flight workflow. Events from one session are delivered in publish order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Severity of a progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A single progress update shown to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub phase: String,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        session_id: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            phase: phase.into(),
            message: message.into(),
            severity,
            icon: None,
            display_type: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn info(
        session_id: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(session_id, phase, message, Severity::Info)
    }

    pub fn warning(
        session_id: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(session_id, phase, message, Severity::Warning)
    }

    pub fn error(
        session_id: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(session_id, phase, message, Severity::Error)
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_display_type(mut self, display_type: impl Into<String>) -> Self {
        self.display_type = Some(display_type.into());
        self
    }
}

/// Broadcast handle for progress events
///
/// Cloning is cheap; all clones feed the same stream.
#[derive(Clone)]
pub struct ProgressPublisher {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Best-effort: a send error only means no observer is
    /// currently subscribed, and is logged at debug.
    pub fn publish(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("progress event dropped: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
