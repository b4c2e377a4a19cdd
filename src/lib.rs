//! Inquest server - operational request orchestration and delegation engine

pub mod api;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod intent;
pub mod planner;
pub mod policy;
pub mod progress;
pub mod registry;
pub mod report;
pub mod store;
pub mod workflow;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::delegate::DelegationClient;
use crate::error::Result;
use crate::intent::IntentRouter;
use crate::planner::Planner;
use crate::policy::PolicyClient;
use crate::progress::ProgressPublisher;
use crate::store::Store;
use crate::workflow::WorkflowEngine;

/// Application state shared across handlers
pub struct AppState {
    pub engine: WorkflowEngine,
    pub store: Store,
    pub progress: ProgressPublisher,
    /// Cancellation tokens of currently running sessions
    pub active: RwLock<HashMap<String, CancellationToken>>,
}

impl AppState {
    pub fn new(config: &Config, pool: SqlitePool) -> Result<Arc<Self>> {
        let registry = Arc::new(config.registry()?);
        let policy = PolicyClient::new(config.policy_gate_url.clone());
        let delegate = DelegationClient::new(&config.delegation);
        let planner = Planner::from_configs(
            &config.planner_backends,
            config.delegation.planner_timeout(),
            config.default_capability.clone(),
        );
        let intent = IntentRouter::new(
            config.intent_rules.clone(),
            config.default_capability.clone(),
        );
        let engine = WorkflowEngine::new(
            registry,
            policy,
            delegate,
            planner,
            intent,
            config.reporting_capability(),
        );

        Ok(Arc::new(Self {
            engine,
            store: Store::new(pool),
            progress: ProgressPublisher::default(),
            active: RwLock::new(HashMap::new()),
        }))
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/requests", post(api::submit))
        .route("/sessions", get(api::list_sessions))
        .route("/sessions/:id", get(api::get_session))
        .route("/sessions/:id/cancel", post(api::cancel_session))
        .route("/ws", get(ws::handler))
        .with_state(state)
}
