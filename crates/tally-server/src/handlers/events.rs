//! Raw-event archive handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, MAX_PAGE_LIMIT};
use tally_core::models::RawEvent;

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    /// Only events nothing matched (pending manual handling)
    #[serde(default)]
    pub unmatched: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /events - archived capture events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventQuery>,
) -> Result<Json<Vec<RawEvent>>, AppError> {
    let limit = params.limit.max(1).min(MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);
    Ok(Json(state.db.list_events(params.unmatched, limit, offset)?))
}
