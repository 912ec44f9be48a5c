//! Rule management and query handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{AppError, AppState, SuccessResponse};
use tally_core::error::Error;
use tally_core::models::{NewRule, Rule, RuleOrigin, SourceKind};

/// Query parameters for listing rules
#[derive(Debug, Deserialize)]
pub struct RuleQuery {
    pub app: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// `user` or `system`
    pub creator: Option<String>,
}

/// GET /rules - list rules by app/type/creator
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RuleQuery>,
) -> Result<Json<Vec<Rule>>, AppError> {
    let kind = match params.kind.as_deref() {
        Some(k) => Some(
            SourceKind::parse(k)
                .ok_or_else(|| AppError::bad_request(&format!("unknown capture type: {k}")))?,
        ),
        None => None,
    };
    let origin = match params.creator.as_deref() {
        Some(c) => Some(
            RuleOrigin::parse(c)
                .ok_or_else(|| AppError::bad_request(&format!("unknown creator: {c}")))?,
        ),
        None => None,
    };

    let rules = state.db.list_rules(params.app.as_deref(), kind, origin)?;
    Ok(Json(rules))
}

/// POST /rules - create a rule
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<NewRule>,
) -> Result<Json<Rule>, AppError> {
    if rule.name.trim().is_empty() {
        return Err(AppError::bad_request("rule name must not be empty"));
    }
    let rule = state.db.insert_rule(&rule)?;
    Ok(Json(rule))
}

/// PUT /rules/:id - update a rule
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(mut rule): Json<Rule>,
) -> Result<Json<Rule>, AppError> {
    rule.id = id;
    match state.db.update_rule(&rule) {
        Ok(()) => Ok(Json(rule)),
        Err(Error::NotFound(msg)) => Err(AppError::not_found(&msg)),
        Err(e) => Err(e.into()),
    }
}

/// DELETE /rules/:id - delete a user rule (system rules are immutable)
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SuccessResponse>, AppError> {
    match state.db.delete_rule(id) {
        Ok(()) => Ok(Json(SuccessResponse { success: true })),
        Err(Error::NotFound(msg)) => Err(AppError::not_found(&msg)),
        Err(Error::InvalidData(msg)) => Err(AppError::conflict(&msg)),
        Err(e) => Err(e.into()),
    }
}

/// GET /apps - distinct source apps seen in the event archive
pub async fn list_apps(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.db.distinct_apps()?))
}
