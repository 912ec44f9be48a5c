//! Bill record query and finalization handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, SuccessResponse, MAX_PAGE_LIMIT};
use tally_core::models::{BillGroup, BillRecord};

#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /bills/groups - bill clusters as (date, member_ids) pairs
pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GroupQuery>,
) -> Result<Json<Vec<BillGroup>>, AppError> {
    let limit = params.limit.max(1).min(MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);
    Ok(Json(state.db.list_groups(limit, offset)?))
}

/// GET /bills/:id - fetch one record
pub async fn get_bill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<BillRecord>, AppError> {
    state
        .db
        .get_bill(id)?
        .map(Json)
        .ok_or_else(|| AppError::not_found(&format!("bill {id}")))
}

/// GET /bills/group/:group_id - all members of a cluster (root first)
pub async fn get_group_members(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
) -> Result<Json<Vec<BillRecord>>, AppError> {
    let members = state.db.bills_in_group(group_id)?;
    if members.is_empty() {
        return Err(AppError::not_found(&format!("bill group {group_id}")));
    }
    Ok(Json(members))
}

/// POST /bills/:id/finalize - explicit transition to SETTLED
pub async fn finalize_bill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    if state.db.get_bill(id)?.is_none() {
        return Err(AppError::not_found(&format!("bill {id}")));
    }
    let settled = state.db.settle_bill(id)?;
    Ok(Json(SuccessResponse { success: settled }))
}
