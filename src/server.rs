//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST`   | `/documents?filename=&model=&storage=` | Upload raw file bytes |
//! | `GET`    | `/documents` | List the caller's documents |
//! | `GET`    | `/documents/{id}` | Status, vector count, running flag |
//! | `PUT`    | `/documents/{id}?filename=` | Replace the document's file |
//! | `DELETE` | `/documents/{id}` | Soft-delete document, vectors and file |
//! | `POST`   | `/documents/{id}/retry` | Re-queue a failed document |
//! | `POST`   | `/documents/{id}/cancel` | Abort an in-flight ingestion |
//! | `POST`   | `/ask` | Answer a question over the caller's documents |
//! | `GET`    | `/history?limit=` | The caller's answered questions |
//! | `GET`    | `/models` | Registered models |
//! | `GET`    | `/storage/info` | Storage mode and backend reachability |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! Callers identify themselves with the `x-user-id` header. Documents
//! owned by someone else are reported as not found.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "ingestion already in progress for document …" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `dimension_mismatch` (500), `backend_error` (502), `storage_error` (502),
//! `timeout` (504), `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docqa_core::models::{Document, QaRecord, StorageMode};
use docqa_core::RagError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::answer::Answer;
use crate::app::App;
use crate::ingest::{DeleteReport, StatusReport, UpdateReport, UploadReceipt, UploadRequest};
use crate::reconcile;
use crate::registry::ModelInfo;
use crate::storage::StorageInfo;

const USER_HEADER: &str = "x-user-id";
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Build the router over a wired [`App`].
pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents", post(handle_upload).get(handle_list))
        .route(
            "/documents/{id}",
            get(handle_status).put(handle_update).delete(handle_delete),
        )
        .route("/documents/{id}/retry", post(handle_retry))
        .route("/documents/{id}/cancel", post(handle_cancel))
        .route("/ask", post(handle_ask))
        .route("/history", get(handle_history))
        .route("/models", get(handle_models))
        .route("/storage/info", get(handle_storage_info))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(app)
}

/// Serve the API on `[server].bind` until the process is terminated.
///
/// Documents left unfinished by a previous process are resumed first,
/// and the reconciliation job is started when dual storage and
/// `reconcile_interval_secs` are configured.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();

    let resumed = app.pipeline.resume_unfinished().await?;
    if resumed > 0 {
        info!(documents = resumed, "resumed pending ingestions");
    }

    let interval = app.config.storage.reconcile_interval_secs;
    let _reconciler = if interval > 0 && app.storage.dual().is_some() {
        Some(reconcile::spawn_periodic(
            app.docs.clone(),
            app.storage.clone(),
            Duration::from_secs(interval),
        ))
    } else {
        None
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "docqa server listening");
    axum::serve(listener, router(app)).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        match err {
            RagError::InvalidRequest(_) | RagError::ExtractionError { .. } => bad_request(message),
            RagError::ModelNotFound { .. } | RagError::DocumentNotFound(_) => not_found(message),
            RagError::IngestionInProgress(_) | RagError::InvalidState { .. } => {
                AppError::new(StatusCode::CONFLICT, "conflict", message)
            }
            RagError::DimensionMismatch { .. } => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "dimension_mismatch", message)
            }
            RagError::EmbeddingBackendError { .. }
            | RagError::ChatBackendError { .. }
            | RagError::VectorStoreError { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "backend_error", message)
            }
            RagError::StorageError { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "storage_error", message)
            }
            RagError::Timeout { .. } => {
                AppError::new(StatusCode::GATEWAY_TIMEOUT, "timeout", message)
            }
            RagError::InvalidConfig(_) | RagError::Database(_) => {
                warn!(error = %message, "internal error");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request(format!("missing {} header", USER_HEADER)))
}

/// Load `id` if it is a live document owned by `user`.
async fn owned(app: &App, id: &str, user: &str) -> Result<Document, AppError> {
    match app.docs.get(id).await? {
        Some(doc) if doc.owner_id == user && !doc.is_deleted => Ok(doc),
        _ => Err(not_found(format!("document not found: {}", id))),
    }
}

// ============ /documents ============

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    storage: Option<String>,
}

async fn handle_upload(
    State(app): State<App>,
    headers: HeaderMap,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadReceipt>), AppError> {
    let owner_id = user_id(&headers)?;
    if body.is_empty() {
        return Err(bad_request("request body must contain the file bytes"));
    }
    let storage_mode = match params.storage.as_deref() {
        Some(s) => Some(
            StorageMode::parse(s)
                .ok_or_else(|| bad_request(format!("unknown storage mode: {}", s)))?,
        ),
        None => None,
    };

    let receipt = app
        .pipeline
        .upload(UploadRequest {
            owner_id,
            filename: params.filename,
            bytes: body.to_vec(),
            model: params.model,
            storage_mode,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<Document>,
}

async fn handle_list(
    State(app): State<App>,
    headers: HeaderMap,
) -> Result<Json<DocumentList>, AppError> {
    let owner_id = user_id(&headers)?;
    let documents = app.docs.list_for_owner(&owner_id).await?;
    Ok(Json(DocumentList { documents }))
}

async fn handle_status(
    State(app): State<App>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<StatusReport>, AppError> {
    let user = user_id(&headers)?;
    owned(&app, &id, &user).await?;
    Ok(Json(app.pipeline.status(&id).await?))
}

#[derive(Deserialize)]
struct UpdateParams {
    filename: String,
}

async fn handle_update(
    State(app): State<App>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<UpdateParams>,
    body: Bytes,
) -> Result<Json<UpdateReport>, AppError> {
    let user = user_id(&headers)?;
    owned(&app, &id, &user).await?;
    if body.is_empty() {
        return Err(bad_request("request body must contain the file bytes"));
    }
    let report = app
        .pipeline
        .update(&id, &params.filename, body.to_vec())
        .await?;
    Ok(Json(report))
}

async fn handle_delete(
    State(app): State<App>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteReport>, AppError> {
    let user = user_id(&headers)?;
    owned(&app, &id, &user).await?;
    Ok(Json(app.pipeline.delete(&id).await?))
}

async fn handle_retry(
    State(app): State<App>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = user_id(&headers)?;
    owned(&app, &id, &user).await?;
    app.pipeline.retry(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn handle_cancel(
    State(app): State<App>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let user = user_id(&headers)?;
    owned(&app, &id, &user).await?;
    let cancelled = app.pipeline.cancel(&id).await?;
    Ok(Json(CancelResponse { cancelled }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(app): State<App>,
    headers: HeaderMap,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    let user = user_id(&headers)?;
    Ok(Json(app.engine.ask(&user, &req.question).await?))
}

// ============ GET /history ============

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct HistoryResponse {
    total: i64,
    entries: Vec<QaRecord>,
}

async fn handle_history(
    State(app): State<App>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let user = user_id(&headers)?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit < 1 {
        return Err(bad_request("limit must be >= 1"));
    }
    let entries = app.docs.history_for(&user, limit).await?;
    let total = app.docs.history_count(&user).await?;
    Ok(Json(HistoryResponse { total, entries }))
}

// ============ GET /models, /storage/info, /health ============

#[derive(Serialize)]
struct ModelList {
    models: Vec<ModelInfo>,
}

async fn handle_models(State(app): State<App>) -> Json<ModelList> {
    Json(ModelList {
        models: app.registry.list(),
    })
}

async fn handle_storage_info(State(app): State<App>) -> Json<StorageInfo> {
    Json(app.storage.info().await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
