//! Tally Web Server
//!
//! Axum-based loopback REST API for the Tally bill-capture pipeline.
//!
//! Capture sources POST raw payloads to `/analysis`; the pipeline converges
//! them into bill records. The rest of the surface is read-only queries
//! (rules, apps, bill groups, archived events) plus management of the
//! known-asset set and explicit bill finalization.

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use tally_core::analyzer::AnalyzerClient;
use tally_core::db::Database;
use tally_core::pipeline::Pipeline;

mod handlers;
mod scheduler;

pub use scheduler::{start_settlement_sweeper, SweepConfig};

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub pipeline: Arc<Pipeline>,
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Create the application router
///
/// The analyzer fallback is taken from the environment (`OLLAMA_HOST` etc.);
/// without it the pipeline runs rules-only and archives unmatched events.
pub fn create_router(db: Database, config: ServerConfig) -> anyhow::Result<Router> {
    let analyzer = AnalyzerClient::from_env();
    create_router_with_analyzer(db, config, analyzer)
}

/// Create the application router with an explicit analyzer (for testing)
pub fn create_router_with_analyzer(
    db: Database,
    config: ServerConfig,
    analyzer: Option<AnalyzerClient>,
) -> anyhow::Result<Router> {
    use tally_core::analyzer::AnalyzerBackend;

    if let Some(ref client) = analyzer {
        info!(
            "Analyzer configured: {} (model: {})",
            client.host(),
            client.model()
        );
    } else {
        info!("ℹ️  Analyzer not configured (set OLLAMA_HOST to enable the AI fallback)");
    }

    let pipeline = Pipeline::new(db.clone(), analyzer)?;
    Ok(create_router_with_pipeline(db, config, pipeline))
}

/// Create the application router around an existing pipeline
///
/// The pipeline owns the digest cache and the per-fingerprint lock map, so a
/// process must route every submission through one instance.
pub fn create_router_with_pipeline(
    db: Database,
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
) -> Router {
    let state = Arc::new(AppState { db, pipeline });

    let router = Router::new()
        // Submission
        .route("/analysis", post(handlers::submit_analysis))
        // Health
        .route("/health", get(handlers::health))
        // Rules
        .route(
            "/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/rules/:id",
            axum::routing::put(handlers::update_rule).delete(handlers::delete_rule),
        )
        .route("/apps", get(handlers::list_apps))
        // Bills
        .route("/bills/groups", get(handlers::list_groups))
        .route("/bills/:id", get(handlers::get_bill))
        .route("/bills/:id/finalize", post(handlers::finalize_bill))
        .route("/bills/group/:group_id", get(handlers::get_group_members))
        // Raw-event archive
        .route("/events", get(handlers::list_events))
        // Known assets
        .route(
            "/assets",
            get(handlers::list_assets).post(handlers::add_asset),
        )
        .route("/assets/:name", axum::routing::delete(handlers::remove_asset))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // CORS: explicit origins only; the default is a loopback service with no
    // cross-origin consumers.
    if config.allowed_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        )
    }
}

/// Build the full service and run it until shutdown
///
/// Constructs the analyzer from the environment, a single pipeline instance,
/// the settlement sweeper, and the router, then binds and serves.
pub async fn serve_with_config(
    db: Database,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    use tally_core::analyzer::AnalyzerBackend;

    let analyzer = AnalyzerClient::from_env();
    if let Some(ref client) = analyzer {
        info!(
            "Analyzer configured: {} (model: {})",
            client.host(),
            client.model()
        );
    } else {
        info!("ℹ️  Analyzer not configured (set OLLAMA_HOST to enable the AI fallback)");
    }

    let pipeline = Pipeline::new(db.clone(), analyzer)?;
    if let Some(sweep) = SweepConfig::from_env() {
        start_settlement_sweeper(Arc::clone(&pipeline), sweep);
    }

    let router = create_router_with_pipeline(db, config, pipeline);
    let listener = tokio::net::TcpListener::bind((host.to_string(), port)).await?;
    info!("Listening on http://{}:{}", host, port);
    axum::serve(listener, router).await?;
    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
