//! services/api/src/web/protocol.rs
//!
//! Defines the JSON bodies exchanged over the HTTP API and the progress events
//! pushed over server-sent events.

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use edubase_core::domain::{Book, JobStatus};
use edubase_core::validation::DownloadRequest;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Viewport used for session jobs that do not ask for a size.
pub const DEFAULT_JOB_WIDTH: u32 = 3840;
pub const DEFAULT_JOB_HEIGHT: u32 = 2160;

//=========================================================================================
// Errors
//=========================================================================================

/// Body of every non-streaming error response.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Machine readable code, e.g. `validation_error`.
    pub error: String,
    pub message: String,
}

/// What handlers return on failure.
pub type HandlerError = (StatusCode, Json<ErrorResponse>);

pub fn error_reply(
    status: StatusCode,
    error: impl Into<String>,
    message: impl Into<String>,
) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            message: message.into(),
        }),
    )
}

//=========================================================================================
// Session API
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct BookResponse {
    pub id: u32,
    pub title: String,
}

impl From<Book> for BookResponse {
    fn from(book: Book) -> Self {
        Self {
            id: book.id.get(),
            title: book.title,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct BooksResponse {
    pub books: Vec<BookResponse>,
}

#[derive(Deserialize, Serialize, ToSchema, Debug, Default)]
#[serde(default)]
pub struct StartDownloadRequest {
    pub book_id: i64,
    /// Browser viewport width; defaults to 3840.
    pub width: Option<u32>,
    /// Browser viewport height; defaults to 2160.
    pub height: Option<u32>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct StartDownloadResponse {
    pub job_id: Uuid,
    #[schema(value_type = String, example = "pending")]
    pub status: JobStatus,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub book_id: u32,
    #[schema(value_type = String, example = "downloading")]
    pub status: JobStatus,
    pub progress: u32,
    pub total_pages: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One `data:` line of a job's event stream.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    #[schema(value_type = String, example = "downloading")]
    pub status: JobStatus,
    pub progress: u32,
    pub total_pages: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

//=========================================================================================
// Single-shot API
//=========================================================================================

/// `POST /download` body. Missing fields count as zero or empty.
#[derive(Deserialize, Serialize, ToSchema, Debug, Default)]
#[serde(default)]
pub struct SingleShotRequest {
    pub email: String,
    pub password: String,
    pub book_id: i64,
    #[schema(example = 1)]
    pub start_page: i64,
    /// `-1` downloads every page.
    #[schema(example = -1)]
    pub max_pages: i64,
}

impl From<SingleShotRequest> for DownloadRequest {
    fn from(body: SingleShotRequest) -> Self {
        DownloadRequest {
            email: body.email,
            password: body.password,
            book_id: body.book_id,
            start_page: body.start_page,
            max_pages: body.max_pages,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct HealthResponse {
    pub status: String,
}
