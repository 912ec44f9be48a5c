//! Liveness handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{AppError, AppState};
use tally_core::analyzer::AnalyzerBackend;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// None when no analyzer is configured (rules-only mode)
    pub analyzer_available: Option<bool>,
}

/// GET /health
pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, AppError> {
    let analyzer_available = match state.pipeline.analyzer() {
        Some(a) => Some(a.health_check().await),
        None => None,
    };
    Ok(Json(HealthResponse {
        status: "ok",
        analyzer_available,
    }))
}
