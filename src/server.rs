//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method   | Path       | Description |
//! |----------|------------|-------------|
//! | `POST`   | `/chat`    | Answer a question over the indexed documents |
//! | `POST`   | `/upload`  | Upload a file (multipart field `file`) and index it |
//! | `GET`    | `/metrics` | Aggregated request metrics |
//! | `DELETE` | `/clear`   | Drop the index and all session histories |
//! | `GET`    | `/health`  | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `no_documents` (400),
//! `unsupported_format` (400), `rate_limited` (429), `capability_error` (500),
//! `internal` (500). Server-side failures never echo their underlying detail.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection,
        rejection::BytesRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::DocentError;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{ChatRequest, ChatResponse, QueryOrchestrator, UploadFile, UploadResponse};
use crate::rate_limit::client_key;

/// Multipart framing allowance on top of the configured file size limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<QueryOrchestrator>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(QueryOrchestrator::new(config.clone())?);
    tracing::info!(
        embedder = orchestrator.embedder().model_name(),
        completer = orchestrator.completer().model_name(),
        "providers ready"
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", config.server.bind);

    axum::serve(listener, router(orchestrator)).await?;
    Ok(())
}

/// The full route table over `orchestrator`.
pub fn router(orchestrator: Arc<QueryOrchestrator>) -> Router {
    let body_limit = orchestrator.config().upload.max_file_bytes + MULTIPART_OVERHEAD_BYTES;
    let state = AppState { orchestrator };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/upload", post(handle_upload))
        .route("/metrics", get(handle_metrics))
        .route("/clear", delete(handle_clear))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
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

/// Converts pipeline and request-shape errors into the JSON error contract.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DocentError> for AppError {
    fn from(err: DocentError) -> Self {
        AppError {
            status: StatusCode::from_u16(err.status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

// ============ GET /health ============

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

// ============ POST /chat ============

/// Admission comes before the body is decoded, so malformed bodies count
/// against the client's rate limit and show up in metrics. Decode errors use
/// the standard error body rather than axum's plain-text rejection.
async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let orchestrator = &state.orchestrator;
    let admission = orchestrator.admit(&client_key(&headers), "chat")?;

    let request = body
        .map_err(|e| DocentError::Validation(format!("failed to read request body: {}", e)))
        .and_then(|bytes| {
            serde_json::from_slice::<ChatRequest>(&bytes)
                .map_err(|e| DocentError::Validation(format!("invalid request body: {}", e)))
        });

    let response = orchestrator.chat_admitted(admission, request).await?;
    Ok(Json(response))
}

// ============ POST /upload ============

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let orchestrator = &state.orchestrator;
    let admission = orchestrator.admit(&client_key(&headers), "upload")?;

    let file = match multipart {
        Ok(multipart) => read_upload(multipart).await,
        Err(e) => Err(DocentError::Validation(format!(
            "invalid multipart body: {}",
            e
        ))),
    };

    let response = orchestrator.upload_admitted(admission, file).await?;
    Ok(Json(response))
}

/// First multipart field named `file`.
async fn read_upload(mut multipart: Multipart) -> Result<UploadFile, DocentError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DocentError::Validation(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| DocentError::Validation(format!("failed to read file: {}", e)))?;
        return Ok(UploadFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Err(DocentError::Validation("no file uploaded".to_string()))
}

// ============ GET /metrics ============

async fn handle_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.orchestrator.metrics())
}

// ============ DELETE /clear ============

#[derive(Serialize)]
struct ClearResponse {
    cleared: bool,
}

async fn handle_clear(State(state): State<AppState>) -> Json<ClearResponse> {
    state.orchestrator.clear();
    Json(ClearResponse { cleared: true })
}
