//! CinchDB API
//!
//! Thin HTTP layer over the engine. The core raises typed errors; this
//! crate only maps them to status codes and JSON bodies.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use cinch_core::{CinchError, ConnectionContext, Row, Value};
use cinch_engine::{Engine, QueryParams};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub project_root: PathBuf,
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(project_root: impl Into<PathBuf>, engine: Arc<Engine>) -> Self {
        Self {
            project_root: project_root.into(),
            engine,
        }
    }

    fn ctx(&self, database: &str, branch: &str) -> ConnectionContext {
        ConnectionContext::new(&self.project_root, database, branch)
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a typed engine error to an HTTP status.
fn error_response(err: CinchError) -> ApiError {
    let status = match &err {
        CinchError::InvalidName(_) | CinchError::SqlValidation(_) => StatusCode::BAD_REQUEST,
        CinchError::NotFound(_) => StatusCode::NOT_FOUND,
        CinchError::AlreadyExists(_)
        | CinchError::SchemaConflict(_)
        | CinchError::MergeConflict { .. } => StatusCode::CONFLICT,
        CinchError::Maintenance(_) => StatusCode::SERVICE_UNAVAILABLE,
        CinchError::Concurrency(_) => StatusCode::LOCKED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/databases", get(list_databases))
        .route("/api/v1/databases/{db}/branches", get(list_branches))
        .route(
            "/api/v1/databases/{db}/branches/{branch}/tenants",
            get(list_tenants),
        )
        .route(
            "/api/v1/databases/{db}/branches/{branch}/tables",
            get(list_tables),
        )
        .route(
            "/api/v1/databases/{db}/branches/{branch}/tables/{table}",
            get(get_table),
        )
        .route(
            "/api/v1/databases/{db}/branches/{branch}/views",
            get(list_views),
        )
        .route("/api/v1/query", post(run_query))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn list_databases(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = state.ctx("main", "main");
    state
        .engine
        .list_databases(&ctx)
        .map(Json)
        .map_err(error_response)
}

async fn list_branches(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = state.ctx(&db, "main");
    state
        .engine
        .list_branches(&ctx)
        .map(Json)
        .map_err(error_response)
}

async fn list_tenants(
    State(state): State<AppState>,
    Path((db, branch)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = state.ctx(&db, &branch);
    state
        .engine
        .list_tenants(&ctx)
        .map(Json)
        .map_err(error_response)
}

async fn list_tables(
    State(state): State<AppState>,
    Path((db, branch)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ctx = state.ctx(&db, &branch);
    state
        .engine
        .list_tables(&ctx)
        .map(Json)
        .map_err(error_response)
}

async fn get_table(
    State(state): State<AppState>,
    Path((db, branch, table)): Path<(String, String, String)>,
) -> Result<Json<cinch_engine::TableInfo>, ApiError> {
    let ctx = state.ctx(&db, &branch);
    state
        .engine
        .get_table(&ctx, &table)
        .map(Json)
        .map_err(error_response)
}

async fn list_views(
    State(state): State<AppState>,
    Path((db, branch)): Path<(String, String)>,
) -> Result<Json<Vec<cinch_engine::ViewInfo>>, ApiError> {
    let ctx = state.ctx(&db, &branch);
    state
        .engine
        .list_views(&ctx)
        .map(Json)
        .map_err(error_response)
}

/// Body of `POST /api/v1/query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub database: String,
    pub branch: String,
    #[serde(default)]
    pub tenant: Option<String>,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
    /// Route to `execute_write` instead of `execute`.
    #[serde(default)]
    pub write: bool,
}

/// Response of `POST /api/v1/query`.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<usize>,
}

async fn run_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let mut ctx = state.ctx(&request.database, &request.branch);
    if let Some(tenant) = &request.tenant {
        ctx = ctx.with_tenant(tenant.clone());
    }
    let params = QueryParams::Positional(request.params);

    if request.write {
        let affected = state
            .engine
            .execute_write(&ctx, &request.sql, params)
            .map_err(error_response)?;
        Ok(Json(QueryResponse {
            rows: None,
            affected_rows: Some(affected),
        }))
    } else {
        let rows = state
            .engine
            .execute(&ctx, &request.sql, params)
            .map_err(error_response)?;
        Ok(Json(QueryResponse {
            rows: Some(rows),
            affected_rows: None,
        }))
    }
}
