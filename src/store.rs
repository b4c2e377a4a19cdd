//! Session archive
//!
//! Terminal sessions are persisted so their reports can be re-rendered later.
//! Phase outputs and the plan are stored as JSON documents; the archive is
//! written once per session when the workflow reaches a terminal phase.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::planner::Plan;
use crate::registry::CapabilityId;
use crate::workflow::session::{Phase, PhaseOutput, Session, SessionError};

/// Database store for archived sessions
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Listing entry for archived sessions
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub acting_user: String,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist `session`. Re-archiving the same session id overwrites the
    /// previous row, which keeps archiving idempotent.
    pub async fn archive(&self, session: &Session) -> Result<()> {
        let outputs = serde_json::to_string(&session.outputs)
            .map_err(|e| AppError::Internal(format!("cannot serialize outputs: {}", e)))?;
        let plan = session
            .plan
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Internal(format!("cannot serialize plan: {}", e)))?;
        let error = session
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Internal(format!("cannot serialize error: {}", e)))?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sessions
                (id, acting_user, request_text, repository_ref, phase, primary_capability,
                 outputs, plan, error, resumes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.acting_user)
        .bind(&session.request_text)
        .bind(&session.repository_ref)
        .bind(session.phase.as_str())
        .bind(session.primary_capability.as_ref().map(|c| c.as_str().to_string()))
        .bind(outputs)
        .bind(plan)
        .bind(error)
        .bind(session.resumes as i64)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Session> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, acting_user, request_text, repository_ref, phase, primary_capability,
                   outputs, plan, error, resumes, created_at, updated_at
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))?;

        row.try_into()
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT id, acting_user, phase, created_at
            FROM sessions
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    acting_user: String,
    request_text: String,
    repository_ref: Option<String>,
    phase: String,
    primary_capability: Option<String>,
    outputs: String,
    plan: Option<String>,
    error: Option<String>,
    resumes: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self> {
        let phase = Phase::from_str(&row.phase).map_err(AppError::Internal)?;
        let outputs: Vec<PhaseOutput> = serde_json::from_str(&row.outputs)
            .map_err(|e| AppError::Internal(format!("corrupt outputs column: {}", e)))?;
        let plan: Option<Plan> = row
            .plan
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Internal(format!("corrupt plan column: {}", e)))?;
        let error: Option<SessionError> = row
            .error
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Internal(format!("corrupt error column: {}", e)))?;

        Ok(Session {
            id: row.id,
            acting_user: row.acting_user,
            request_text: row.request_text,
            repository_ref: row.repository_ref,
            phase,
            outputs,
            plan,
            primary_capability: row.primary_capability.map(CapabilityId::new),
            resumes: row.resumes as u32,
            phase_retries: 0,
            error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: String,
    acting_user: String,
    phase: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<SummaryRow> for SessionSummary {
    type Error = AppError;

    fn try_from(row: SummaryRow) -> Result<Self> {
        Ok(SessionSummary {
            id: row.id,
            acting_user: row.acting_user,
            phase: Phase::from_str(&row.phase).map_err(AppError::Internal)?,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::ResultEnvelope;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Store {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY NOT NULL,
                acting_user TEXT NOT NULL,
                request_text TEXT NOT NULL,
                repository_ref TEXT,
                phase TEXT NOT NULL,
                primary_capability TEXT,
                outputs TEXT NOT NULL DEFAULT '[]',
                plan TEXT,
                error TEXT,
                resumes INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("Failed to create sessions table");

        Store::new(pool)
    }

    fn terminal_session() -> Session {
        let mut session = Session::new("sess-1", "alice", "create a vm instance", None);
        session.plan = Some(Plan::fallback("create a vm instance", "gcloud".into()));
        session.primary_capability = Some("gcloud".into());
        session.record(
            Phase::Routing,
            vec![ResultEnvelope::local("gcloud", json!({"summary": "created"}))],
        );
        session.fail_gate("analysis gate exhausted its retry budget");
        session
    }

    #[tokio::test]
    async fn test_archive_and_get_round_trip() {
        let store = setup_test_db().await;
        let session = terminal_session();

        store.archive(&session).await.unwrap();
        let loaded = store.get("sess-1").await.unwrap();

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.acting_user, "alice");
        assert_eq!(loaded.phase, Phase::Failed);
        assert_eq!(loaded.primary_capability, Some("gcloud".into()));
        assert_eq!(loaded.outputs.len(), 1);
        assert_eq!(loaded.outputs[0].envelopes[0].capability, "gcloud".into());
        assert!(matches!(
            loaded.error,
            Some(SessionError::GateAbort { .. })
        ));
        assert!(loaded.plan.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_session_is_not_found() {
        let store = setup_test_db().await;
        let result = store.get("missing").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_archive_is_idempotent() {
        let store = setup_test_db().await;
        let mut session = terminal_session();

        store.archive(&session).await.unwrap();
        session.record(
            Phase::Analysis,
            vec![ResultEnvelope::local("logs", json!({"summary": "oom"}))],
        );
        store.archive(&session).await.unwrap();

        let loaded = store.get("sess-1").await.unwrap();
        assert_eq!(loaded.outputs.len(), 2);

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let store = setup_test_db().await;
        store.archive(&terminal_session()).await.unwrap();

        let mut other = Session::new("sess-2", "bob", "check logs", None);
        other.cancel();
        store.archive(&other).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|s| s.id == "sess-2"));
    }
}
