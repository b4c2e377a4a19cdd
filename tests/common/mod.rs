//! Shared helpers for integration tests
#![allow(dead_code)]

use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

use inquest::config::{Config, DelegationTuning, PlannerBackendConfig};
use inquest::intent::IntentRule;
use inquest::registry::CapabilityEntry;
use inquest::AppState;

pub fn capability(id: &str, base_uri: &str) -> CapabilityEntry {
    CapabilityEntry {
        id: id.into(),
        name: format!("{} worker", id),
        address: format!("{}/execute", base_uri),
        request_shape: Default::default(),
        permission: format!("use:{}", id),
    }
}

pub fn rule(keywords: &[&str], capability: &str) -> IntentRule {
    IntentRule {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        capability: capability.into(),
    }
}

pub fn backend(name: &str, base_uri: &str) -> PlannerBackendConfig {
    PlannerBackendConfig {
        name: name.to_string(),
        url: format!("{}/plan", base_uri),
    }
}

/// Retry tuning that keeps tests fast
pub fn fast_tuning() -> DelegationTuning {
    DelegationTuning {
        max_attempts: 3,
        timeout_ms: 2_000,
        backoff_base_ms: 10,
        backoff_cap_ms: 20,
        planner_timeout_ms: 1_000,
    }
}

pub async fn test_state(config: Config) -> Arc<AppState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    // Run migrations manually
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

    AppState::new(&config, pool).expect("Failed to build app state")
}
