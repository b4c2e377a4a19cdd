//! Request-scoped context propagation
//!
//! One logical scope per request carries the session identity, the acting
//! user, and the progress publisher across every await point of that request.
//! Scopes are task-local: concurrent sessions in the same process never see
//! each other's values.

use tokio::task_local;

use crate::error::{AppError, Result};
use crate::progress::{ProgressEvent, ProgressPublisher, Severity};

task_local! {
    static SCOPE: RequestScope;
}

/// The values implicitly available to all nested operations of one request
#[derive(Clone)]
pub struct RequestScope {
    pub session_id: String,
    pub acting_user: String,
    pub progress: ProgressPublisher,
}

impl RequestScope {
    pub fn new(
        session_id: impl Into<String>,
        acting_user: impl Into<String>,
        progress: ProgressPublisher,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            acting_user: acting_user.into(),
            progress,
        }
    }

    /// Run a future with this scope installed. The scope is torn down on every
    /// exit path, including panic unwinding and cancellation.
    pub async fn enter<F>(self, fut: F) -> F::Output
    where
        F: std::future::Future,
    {
        SCOPE.scope(self, fut).await
    }

    /// The active scope, or `ContextMissing` when called outside `enter`.
    pub fn current() -> Result<RequestScope> {
        SCOPE
            .try_with(|scope| scope.clone())
            .map_err(|_| AppError::ContextMissing)
    }

    /// Publish a progress event attributed to this scope's session.
    pub fn emit(&self, phase: &str, severity: Severity, message: impl Into<String>) {
        self.progress.publish(ProgressEvent::new(
            self.session_id.clone(),
            phase,
            message,
            severity,
        ));
    }
}
