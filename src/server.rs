//! HTTP serving surface.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness, pipeline state (`empty`, `loading`, `ready`) and index age |
//! | `POST` | `/ask` | Answer a question: `{"message": "..."}` → `{"answer", "sources"}` |
//! | `POST` | `/ingest` | Upload documents: `{"files": [{"filename", "content_base64"}]}`; files that cannot be extracted are listed in `skipped` |
//!
//! `/health` answers immediately, even while the pipeline is still loading;
//! warm-up starts when the server starts.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "no documents have been ingested yet" } }
//! ```
//!
//! | Code | Status | Cause |
//! |------|--------|-------|
//! | `bad_request` | 400 | empty question, malformed upload |
//! | `empty_input` | 400 | upload produced no indexable text, or a bad file name |
//! | `not_ready` | 503 | nothing ingested yet |
//! | `timeout` | 503 | pipeline still loading after the configured wait |
//! | `model_unavailable` | 503 | embedding model failed to load |
//! | `generation_failed` | 502 | generation backend error |
//! | `internal` | 500 | anything else |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front-end
//! can call the API directly.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::assistant::Assistant;
use crate::error::Error;
use crate::ingest::IngestReport;
use crate::lifecycle::PipelineState;
use crate::models::Answer;

/// Bind to `[server].bind`, start warm-up and serve until the process ends.
pub async fn run_server(assistant: Assistant) -> anyhow::Result<()> {
    let bind_addr = assistant.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    serve(listener, assistant).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, assistant: Assistant) -> anyhow::Result<()> {
    assistant.warm_up();
    axum::serve(listener, router(assistant)).await?;
    Ok(())
}

pub fn router(assistant: Assistant) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Base64 inflates uploads by a third; leave headroom for several files.
    let body_limit = usize::try_from(assistant.config().documents.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(2);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/ingest", post(handle_ingest))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(assistant)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidQuestion(_) | Error::Extract { .. } => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            Error::EmptyInput(_) => (StatusCode::BAD_REQUEST, "empty_input"),
            Error::RetrievalUnavailable(_) | Error::IndexNotFound(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
            }
            Error::WarmupTimeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "timeout"),
            Error::ModelUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable"),
            Error::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    pipeline: PipelineState,
    /// Last write of the index behind the ready pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    index_updated_at: Option<DateTime<Utc>>,
}

async fn handle_health(State(assistant): State<Assistant>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pipeline: assistant.state(),
        index_updated_at: assistant.index_updated_at(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    message: String,
}

async fn handle_ask(
    State(assistant): State<Assistant>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let answer = assistant.ask(&req.message).await?;
    Ok(Json(answer))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    #[serde(default)]
    files: Vec<UploadedFile>,
}

#[derive(Deserialize)]
struct UploadedFile {
    filename: String,
    content_base64: String,
}

async fn handle_ingest(
    State(assistant): State<Assistant>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    if req.files.is_empty() {
        return Err(AppError::from(Error::EmptyInput(
            "no files uploaded".to_string(),
        )));
    }

    let mut files = Vec::with_capacity(req.files.len());
    for file in req.files {
        let bytes = BASE64
            .decode(file.content_base64.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", file.filename, e)))?;
        files.push((file.filename, bytes));
    }

    let report = assistant.ingest_files(files).await?;
    Ok(Json(report))
}
