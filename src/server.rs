//! HTTP server.
//!
//! Accepts file uploads, writes each one to a temp file under the uploads
//! directory, and queues it for chunking. The acknowledgment is sent as soon
//! as the temp file is on disk; chunking happens afterwards on the ingest
//! workers, and its outcome is visible through `GET /uploads/{id}`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Project name |
//! | `GET`  | `/uuid4` | A fresh random UUID |
//! | `POST` | `/upload-file` | Multipart upload (field `file`) |
//! | `GET`  | `/uploaded_chunks_db` | Dump of the chunk index |
//! | `GET`  | `/uploads/{id}` | Ingest status of one upload |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unprocessable_entity", "message": "missing multipart field: file" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `unprocessable_entity` (422), `unavailable` (503), `internal` (500).
//!
//! Request bodies are not size-limited.

use std::collections::BTreeMap;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::index::{ChunkIndex, InMemoryIndex};
use crate::ingest::IngestJob;
use crate::models::UploadStatus;
use crate::queue::IngestQueue;
use crate::status::StatusRegistry;

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    index: Arc<dyn ChunkIndex>,
    statuses: Arc<StatusRegistry>,
    queue: IngestQueue,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        index: Arc<dyn ChunkIndex>,
        statuses: Arc<StatusRegistry>,
        queue: IngestQueue,
    ) -> Self {
        Self {
            config,
            index,
            statuses,
            queue,
        }
    }
}

/// Builds the router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/uuid4", get(handle_uuid4))
        .route("/upload-file", post(handle_upload))
        .route("/uploaded_chunks_db", get(handle_chunks_db))
        .route("/uploads/{id}", get(handle_upload_status))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the server with a fresh in-memory index.
///
/// Creates the uploads directory if needed, spawns the ingest workers, and
/// serves until Ctrl-C. On shutdown, queued uploads are chunked before this
/// returns.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_index(config, Arc::new(InMemoryIndex::new())).await
}

/// Like [`run_server`], but records chunks into the given index.
pub async fn run_server_with_index(
    config: &Config,
    index: Arc<dyn ChunkIndex>,
) -> anyhow::Result<()> {
    let uploads_dir = &config.storage.uploads_dir;
    tokio::fs::create_dir_all(uploads_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create uploads directory: {}",
                uploads_dir.display()
            )
        })?;

    let statuses = Arc::new(StatusRegistry::with_retention(
        config.queue.retained_statuses,
    ));
    let (queue, workers) = IngestQueue::start(
        config.queue.capacity,
        config.queue.workers,
        index.clone(),
        statuses.clone(),
    );

    let state = AppState::new(Arc::new(config.clone()), index, statuses, queue);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(
        addr = %listener.local_addr()?,
        uploads_dir = %uploads_dir.display(),
        chunk_size = config.storage.chunk_size,
        workers = workers.len(),
        "upload server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped; draining ingest queue");
    workers.join().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
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
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn unprocessable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "unprocessable_entity",
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable",
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: format!("{:#}", err),
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct RootResponse {
    #[serde(rename = "Project name")]
    project_name: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        project_name: "Upload large file",
    })
}

// ============ GET /uuid4 ============

#[derive(Serialize)]
struct UuidResponse {
    result: Uuid,
}

async fn handle_uuid4() -> Json<UuidResponse> {
    Json(UuidResponse {
        result: Uuid::new_v4(),
    })
}

// ============ POST /upload-file ============

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    upload_id: Uuid,
}

/// Handler for `POST /upload-file`.
///
/// Streams the `file` field to `temp_{id}.bin`, queues the ingest job, and
/// acknowledges immediately. Other fields are skipped. Returns `422` when no
/// `file` field is present and `503` once the queue is closed.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let storage = &state.config.storage;
    let upload_id = Uuid::new_v4();
    let job = IngestJob::for_upload(upload_id, &storage.uploads_dir, storage.chunk_size);

    let mut written = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        written = Some(save_field(field, &job.source_path).await?);
        break;
    }

    let Some(bytes) = written else {
        return Err(unprocessable(format!(
            "missing multipart field: {}",
            FILE_FIELD
        )));
    };

    if let Err(e) = state.queue.submit(job.clone()).await {
        remove_partial(&job.source_path).await;
        return Err(unavailable(e.to_string()));
    }

    info!(%upload_id, bytes, "upload accepted");
    Ok(Json(UploadResponse {
        message: "File upload in progress",
        upload_id,
    }))
}

/// Streams one multipart field into a new file at `path`.
async fn save_field(mut field: Field<'_>, path: &FsPath) -> Result<u64, AppError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create temp file: {}", path.display()))
        .map_err(internal)?;

    let mut bytes: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                drop(file);
                remove_partial(path).await;
                return Err(bad_request(e.body_text()));
            }
        };
        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            remove_partial(path).await;
            return Err(internal(anyhow::Error::new(e).context(format!(
                "Failed to write temp file: {}",
                path.display()
            ))));
        }
        bytes += chunk.len() as u64;
    }

    file.flush()
        .await
        .with_context(|| format!("Failed to write temp file: {}", path.display()))
        .map_err(internal)?;
    Ok(bytes)
}

async fn remove_partial(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove temp file");
    }
}

// ============ GET /uploaded_chunks_db ============

/// Handler for `GET /uploaded_chunks_db`.
///
/// Every index entry, with key and value rendered as tuple strings:
/// `"('<path>', <seq>)": "('<checksum>', '<tag>')"`.
async fn handle_chunks_db(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    let entries = state.index.entries().await.map_err(internal)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|(key, entry)| (key.to_string(), entry.to_string()))
            .collect(),
    ))
}

// ============ GET /uploads/{id} ============

async fn handle_upload_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadStatus>, AppError> {
    let upload_id =
        Uuid::parse_str(&id).map_err(|_| bad_request(format!("invalid upload id: {}", id)))?;
    state
        .statuses
        .get(&upload_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown upload: {}", upload_id)))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
