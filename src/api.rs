//! HTTP API handlers
//!
//! The inbound surface: submit a request, fetch an archived session, cancel a
//! running session. Every submission gets a structured response with a status
//! field; per-request failures never surface as transport errors.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::RequestScope;
use crate::error::{AppError, Result};
use crate::report::{self, Report};
use crate::store::SessionSummary;
use crate::workflow::session::{Phase, Session, SessionError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub request_text: String,
    pub session_id: Option<String>,
    pub acting_user: String,
    pub repository_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
    Partial,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: RequestStatus,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ArchivedSessionResponse {
    pub session: Session,
    pub report: Report,
}

pub async fn health() -> &'static str {
    "ok"
}

/// Run one investigation end to end and answer with its report.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>> {
    if request.request_text.trim().is_empty() {
        return Err(AppError::BadRequest(
            "request_text must not be empty".to_string(),
        ));
    }
    if request.acting_user.trim().is_empty() {
        return Err(AppError::BadRequest(
            "acting_user must not be empty".to_string(),
        ));
    }

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut session = Session::new(
        session_id.clone(),
        request.acting_user.clone(),
        request.request_text.clone(),
        request.repository_ref.clone(),
    );

    let cancel = CancellationToken::new();
    state
        .active
        .write()
        .await
        .insert(session_id.clone(), cancel.clone());

    let scope = RequestScope::new(
        session_id.clone(),
        request.acting_user.clone(),
        state.progress.clone(),
    );
    let outcome = scope
        .enter(state.engine.run(&mut session, &cancel))
        .await;

    state.active.write().await.remove(&session_id);
    outcome?;

    if let Err(e) = state.store.archive(&session).await {
        tracing::warn!(session = %session_id, "failed to archive session: {}", e);
    }

    Ok(Json(response_for(&session)))
}

/// Fetch an archived session and re-render its report.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ArchivedSessionResponse>> {
    let session = state.store.get(&id).await?;
    let report = report::build(&session);
    Ok(Json(ArchivedSessionResponse { session, report }))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionSummary>>> {
    Ok(Json(state.store.list().await?))
}

/// Cancel a running session at its next phase boundary.
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let active = state.active.read().await;
    match active.get(&id) {
        Some(token) => {
            token.cancel();
            Ok(StatusCode::ACCEPTED)
        }
        None => Err(AppError::NotFound(format!("Session {} is not active", id))),
    }
}

/// Map a terminal session onto the response contract. A best-effort report is
/// attached whenever at least one phase produced output.
pub(crate) fn response_for(session: &Session) -> SubmitResponse {
    let report = (!session.outputs.is_empty()).then(|| report::build(session));

    let (status, error) = match (&session.phase, &session.error) {
        (Phase::Done, _) => (RequestStatus::Success, None),
        (_, Some(SessionError::PolicyDenied { reason })) => {
            (RequestStatus::Error, Some(reason.clone()))
        }
        (_, Some(SessionError::GateAbort { reason })) => {
            (RequestStatus::Partial, Some(reason.clone()))
        }
        (_, Some(SessionError::Cancelled)) => (
            RequestStatus::Partial,
            Some("session cancelled".to_string()),
        ),
        _ => (
            RequestStatus::Error,
            Some("workflow ended in a non-terminal phase".to_string()),
        ),
    };

    SubmitResponse {
        status,
        session_id: session.id.clone(),
        report,
        error,
    }
}
