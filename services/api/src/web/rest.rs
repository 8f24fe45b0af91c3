//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the session REST API and the master
//! definition for the OpenAPI specification.

use crate::web::{
    auth, download_task, events,
    protocol::{
        error_reply, BookResponse, BooksResponse, CreateSessionResponse, ErrorResponse,
        HandlerError, HealthResponse, JobStatusResponse, LoginRequest, LoginResponse,
        ProgressEvent, SingleShotRequest, StartDownloadRequest, StartDownloadResponse,
        DEFAULT_JOB_HEIGHT, DEFAULT_JOB_WIDTH,
    },
    session::Session,
    single_shot,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use edubase_core::domain::{BookId, JobStatus};
use edubase_core::library::LibraryLister;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::web::job::DownloadJob;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::create_session_handler,
        auth::login_handler,
        books_handler,
        start_download_handler,
        job_status_handler,
        job_pdf_handler,
        events::job_events_handler,
        single_shot::download_handler,
        single_shot::health_handler,
    ),
    components(
        schemas(
            CreateSessionResponse,
            LoginRequest,
            LoginResponse,
            BookResponse,
            BooksResponse,
            StartDownloadRequest,
            StartDownloadResponse,
            JobStatusResponse,
            ProgressEvent,
            SingleShotRequest,
            HealthResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "Edubase to PDF API", description = "Download Edubase books as PDF files.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Library
//=========================================================================================

/// GET /api/books - List the books of the logged-in account
#[utoipa::path(
    get,
    path = "/api/books",
    params(("session_id" = Option<String>, Query, description = "Session id, unless sent as cookie")),
    responses(
        (status = 200, description = "Books in library order", body = BooksResponse),
        (status = 401, description = "Session is not logged in", body = ErrorResponse),
        (status = 409, description = "The session browser is busy with a download", body = ErrorResponse),
        (status = 500, description = "Listing failed", body = ErrorResponse)
    )
)]
pub async fn books_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
) -> Result<impl IntoResponse, HandlerError> {
    require_login(&session)?;

    let browser = session.browser().try_lock().map_err(|_| {
        error_reply(
            StatusCode::CONFLICT,
            "session_busy",
            "A download is running in this session",
        )
    })?;
    let driver = browser.as_ref().ok_or_else(|| {
        error_reply(StatusCode::UNAUTHORIZED, "unauthorized", "Not logged in")
    })?;

    let books = LibraryLister::new(driver.as_ref(), &state.edubase)
        .get_books()
        .await
        .map_err(|e| {
            error!("Failed to list books for session {}: {}", session.id, e);
            error_reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "processing_error",
                "Failed to list books",
            )
        })?;

    Ok(Json(BooksResponse {
        books: books.into_iter().map(BookResponse::from).collect(),
    }))
}

//=========================================================================================
// Download jobs
//=========================================================================================

/// POST /api/download - Start downloading a book in the background
#[utoipa::path(
    post,
    path = "/api/download",
    request_body = StartDownloadRequest,
    params(("session_id" = Option<String>, Query, description = "Session id, unless sent as cookie")),
    responses(
        (status = 202, description = "Job accepted", body = StartDownloadResponse),
        (status = 400, description = "Malformed body or invalid book id", body = ErrorResponse),
        (status = 401, description = "Session is not logged in", body = ErrorResponse)
    )
)]
pub async fn start_download_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
    payload: Result<Json<StartDownloadRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    let Json(req) = payload.map_err(|e| {
        error_reply(StatusCode::BAD_REQUEST, "invalid_json", e.body_text())
    })?;
    require_login(&session)?;

    let book_id = BookId::new(req.book_id).ok_or_else(|| {
        error_reply(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "book_id must be a positive integer",
        )
    })?;
    let width = req.width.unwrap_or(DEFAULT_JOB_WIDTH);
    let height = req.height.unwrap_or(DEFAULT_JOB_HEIGHT);
    if width == 0 || height == 0 {
        return Err(error_reply(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "width and height must be positive",
        ));
    }

    let job_id = Uuid::new_v4();
    let staging_dir = state.config.download_dir.join(job_id.to_string());
    let job = Arc::new(DownloadJob::new(job_id, book_id, width, height, staging_dir));
    session.insert_job(job.clone()).await;
    info!(
        "Session {} queued job {} for book {} at {}x{}",
        session.id, job_id, book_id, width, height
    );

    tokio::spawn(download_task::download_process(
        state.clone(),
        session.clone(),
        job,
    ));

    Ok((
        StatusCode::ACCEPTED,
        Json(StartDownloadResponse {
            job_id,
            status: JobStatus::Pending,
        }),
    ))
}

/// GET /api/download/{job_id} - Current state of a job
#[utoipa::path(
    get,
    path = "/api/download/{job_id}",
    params(
        ("job_id" = String, Path, description = "Job id returned by POST /api/download"),
        ("session_id" = Option<String>, Query, description = "Session id, unless sent as cookie")
    ),
    responses(
        (status = 200, description = "Job state", body = JobStatusResponse),
        (status = 404, description = "No such job in this session", body = ErrorResponse)
    )
)]
pub async fn job_status_handler(
    Extension(session): Extension<Arc<Session>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let job = find_job(&session, &job_id).await?;
    Ok(Json(job.status_response()))
}

/// GET /api/download/{job_id}/pdf - Fetch the finished PDF
#[utoipa::path(
    get,
    path = "/api/download/{job_id}/pdf",
    params(
        ("job_id" = String, Path, description = "Job id returned by POST /api/download"),
        ("session_id" = Option<String>, Query, description = "Session id, unless sent as cookie")
    ),
    responses(
        (status = 200, description = "The PDF", content_type = "application/pdf"),
        (status = 400, description = "Job has not completed", body = ErrorResponse),
        (status = 404, description = "No such job, or its PDF is gone", body = ErrorResponse)
    )
)]
pub async fn job_pdf_handler(
    Extension(session): Extension<Arc<Session>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let job = find_job(&session, &job_id).await?;
    let job_state = job.state();

    if job_state.status != JobStatus::Completed {
        return Err(error_reply(
            StatusCode::BAD_REQUEST,
            "not_ready",
            format!("Job is {}, not completed", job_state.status),
        ));
    }

    let missing = || {
        error_reply(
            StatusCode::NOT_FOUND,
            "artifact_missing",
            "PDF file not found",
        )
    };
    let pdf_path = job_state.pdf_path.ok_or_else(missing)?;
    let file = tokio::fs::File::open(&pdf_path).await.map_err(|e| {
        error!("Failed to open {}: {}", pdf_path.display(), e);
        missing()
    })?;
    let length = file.metadata().await.map(|m| m.len()).map_err(|_| missing())?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=book_{}.pdf", job.book_id),
            ),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}

//=========================================================================================
// Helpers
//=========================================================================================

fn require_login(session: &Session) -> Result<(), HandlerError> {
    if session.is_authenticated() {
        Ok(())
    } else {
        Err(error_reply(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Not logged in",
        ))
    }
}

/// Looks a job up in the caller's own session. Malformed ids are simply unknown.
pub(crate) async fn find_job(session: &Session, job_id: &str) -> Result<Arc<DownloadJob>, HandlerError> {
    let not_found = || error_reply(StatusCode::NOT_FOUND, "not_found", "Job not found");
    let id = Uuid::parse_str(job_id).map_err(|_| not_found())?;
    session.job(id).await.ok_or_else(not_found)
}
