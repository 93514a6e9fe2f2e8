//! Axum handlers for the plain HTTP routes.

use crate::state::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub message: String,
    pub active_sessions: usize,
}

/// Liveness probe.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        message: "Server is running".to_string(),
        active_sessions: state.sessions.len().await,
    })
}
