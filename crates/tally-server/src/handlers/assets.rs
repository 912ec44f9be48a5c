//! Known-asset set management handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, SuccessResponse};

#[derive(Debug, Deserialize)]
pub struct AddAssetRequest {
    pub name: String,
}

/// GET /assets - the known-asset set
pub async fn list_assets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.db.list_known_assets()?))
}

/// POST /assets - add a canonical asset name (idempotent)
pub async fn add_asset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddAssetRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("asset name must not be empty"));
    }
    state.db.add_known_asset(name)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// DELETE /assets/:name - remove a canonical asset name
pub async fn remove_asset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let removed = state.db.remove_known_asset(&name)?;
    if !removed {
        return Err(AppError::not_found(&format!("asset {name}")));
    }
    Ok(Json(SuccessResponse { success: true }))
}
