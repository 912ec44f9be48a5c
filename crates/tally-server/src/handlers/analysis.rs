//! Submission endpoint: raw payloads in, analysis outcomes out

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState};
use tally_core::models::{BillRecord, Payload, SourceKind};
use tally_core::pipeline::{AnalysisOutcome, Submission};

/// Query parameters for POST /analysis
#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub app: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "fromAppData", default)]
    pub from_app_data: bool,
    #[serde(rename = "forceAI", default)]
    pub force_ai: bool,
}

/// Request body: the raw payload, text or structured
#[derive(Debug, Deserialize)]
pub struct AnalysisBody {
    pub data: serde_json::Value,
}

/// Analysis result reported back to the submitting source
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum AnalysisResponse {
    /// Byte-identical repeat within the dedup TTL (idempotent, not an error)
    Duplicate,
    /// Archived for manual handling; nothing matched
    Unmatched { event_id: i64 },
    /// Candidate extracted and merged
    Matched {
        bill: BillRecord,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent: Option<BillRecord>,
    },
}

/// POST /analysis?app=<id>&type=<kind>&fromAppData=<bool>&forceAI=<bool>
pub async fn submit_analysis(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalysisQuery>,
    Json(body): Json<AnalysisBody>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let Some(kind) = SourceKind::parse(&params.kind) else {
        return Err(AppError::bad_request(&format!(
            "unknown capture type: {}",
            params.kind
        )));
    };
    if params.app.trim().is_empty() {
        return Err(AppError::bad_request("app must not be empty"));
    }

    let payload = match body.data {
        serde_json::Value::String(s) => Payload::Text(s),
        other => Payload::Structured(other),
    };

    let outcome = state
        .pipeline
        .clone()
        .submit(Submission {
            app: params.app,
            kind,
            payload,
            from_app_data: params.from_app_data,
            force_ai: params.force_ai,
        })
        .await?;

    Ok(Json(match outcome {
        AnalysisOutcome::Duplicate => AnalysisResponse::Duplicate,
        AnalysisOutcome::Unmatched { event_id } => AnalysisResponse::Unmatched { event_id },
        AnalysisOutcome::Matched { bill, parent } => AnalysisResponse::Matched { bill, parent },
    }))
}
