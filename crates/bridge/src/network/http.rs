//! Diagnostic HTTP handlers.

use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::health::{HealthReport, SessionsReport};
use crate::ssh::SshConnector;

pub async fn health<C: SshConnector>(State(state): State<AppState<C>>) -> Json<HealthReport> {
    Json(state.health.snapshot())
}

pub async fn sessions<C: SshConnector>(State(state): State<AppState<C>>) -> Json<SessionsReport> {
    Json(state.health.sessions())
}
