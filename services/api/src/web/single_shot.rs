//! services/api/src/web/single_shot.rs
//!
//! The stateless API: one request logs in, downloads a book and streams the
//! PDF back, using its own browser and scratch directory. Also the health check.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use edubase_core::auth::LoginMode;
use edubase_core::orchestrator::{DownloadError, DownloadOrchestrator, DownloadPlan, ProgressUpdate};
use edubase_core::validation::{validate_download_request, DownloadRequest};
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::web::{
    protocol::{error_reply, ErrorResponse, HandlerError, HealthResponse, SingleShotRequest},
    state::AppState,
};

/// GET /health - Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "The server is up", body = HealthResponse),
        (status = 405, description = "Any method but GET", body = ErrorResponse)
    )
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Fallback for wrong methods on the single-shot routes.
pub async fn method_not_allowed() -> HandlerError {
    error_reply(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        "Only POST method is allowed",
    )
}

/// Fallback for wrong methods on `/health`.
pub async fn health_method_not_allowed() -> HandlerError {
    error_reply(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        "Only GET method is allowed",
    )
}

/// POST /download - Download a book in one request
///
/// Validates the request before any browser is started. Once the PDF starts
/// streaming, failures can only end the connection early.
#[utoipa::path(
    post,
    path = "/download",
    request_body = SingleShotRequest,
    responses(
        (status = 200, description = "The PDF", content_type = "application/pdf"),
        (status = 400, description = "Malformed body or invalid fields", body = ErrorResponse),
        (status = 401, description = "Authentication failed", body = ErrorResponse),
        (status = 405, description = "Any method but POST", body = ErrorResponse),
        (status = 500, description = "Download failed", body = ErrorResponse)
    )
)]
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SingleShotRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    // 1. Decode and validate
    let Json(body) = payload.map_err(|e| {
        debug!("Rejected single-shot body: {}", e);
        error_reply(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            "Invalid JSON request body",
        )
    })?;
    let request = DownloadRequest::from(body);
    let validated = validate_download_request(&request).map_err(|e| {
        error_reply(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
    })?;

    info!(
        "Single-shot download of book {} (start page {}, max pages {:?})",
        validated.book_id, validated.start_page, validated.max_pages
    );

    // 2. Scratch space, removed when the response body is dropped
    let staging = tempfile::Builder::new()
        .prefix("edubase-download-")
        .tempdir()
        .map_err(|e| {
            error!("Failed to create a scratch directory: {}", e);
            processing_error()
        })?;
    let output = staging.path().join(format!("book_{}.pdf", validated.book_id));
    let plan = DownloadPlan {
        start_page: validated.start_page,
        max_pages: validated.max_pages,
        overwrite: true,
        ..DownloadPlan::new(validated.book_id, staging.path(), &output)
    };

    // 3. Run the whole workflow on a fresh browser
    let options = state
        .config
        .launch_options(state.config.browser_width, state.config.browser_height);
    let orchestrator = DownloadOrchestrator::new(state.edubase.clone(), state.assembler.clone());
    let outcome = orchestrator
        .run(
            state.launcher.as_ref(),
            &options,
            &LoginMode::Credentials(validated.credentials),
            &plan,
            &log_progress,
        )
        .await
        .map_err(|e| match e {
            DownloadError::AuthFailed(source) => {
                warn!("Single-shot login failed: {}", source);
                error_reply(
                    StatusCode::UNAUTHORIZED,
                    "auth_failed",
                    "Authentication failed",
                )
            }
            other => {
                error!("Single-shot download failed: {}", other);
                processing_error()
            }
        })?;

    // 4. Stream the PDF
    let file = tokio::fs::File::open(&outcome.pdf_path).await.map_err(|e| {
        error!("Failed to open {}: {}", outcome.pdf_path.display(), e);
        processing_error()
    })?;
    let length = file.metadata().await.map(|m| m.len()).map_err(|e| {
        error!("Failed to stat {}: {}", outcome.pdf_path.display(), e);
        processing_error()
    })?;

    let book_id = validated.book_id;
    let body = async_stream::stream! {
        let _staging = staging;
        let mut chunks = ReaderStream::new(file);
        while let Some(chunk) = chunks.next().await {
            if let Err(e) = &chunk {
                error!("Streaming the PDF of book {} failed: {}", book_id, e);
            }
            yield chunk;
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=book_{}.pdf", book_id),
            ),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(body),
    ))
}

fn processing_error() -> HandlerError {
    error_reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        "processing_error",
        "Failed to process request",
    )
}

fn log_progress(update: ProgressUpdate) {
    debug!("Single-shot progress: {:?}", update);
}
