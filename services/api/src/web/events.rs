//! services/api/src/web/events.rs
//!
//! Server-sent event stream of a job's progress.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::Path,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use tracing::{debug, warn};

use crate::web::{
    protocol::{ErrorResponse, HandlerError, ProgressEvent},
    rest::find_job,
    session::Session,
};

/// GET /api/download/{job_id}/events - Stream a job's progress
///
/// The first event is the job's current state. The stream ends after the first
/// event with a terminal status. Disconnecting only drops this subscriber.
#[utoipa::path(
    get,
    path = "/api/download/{job_id}/events",
    params(
        ("job_id" = String, Path, description = "Job id returned by POST /api/download"),
        ("session_id" = Option<String>, Query, description = "Session id, unless sent as cookie")
    ),
    responses(
        (status = 200, description = "One JSON ProgressEvent per `data:` line", content_type = "text/event-stream", body = ProgressEvent),
        (status = 404, description = "No such job in this session", body = ErrorResponse)
    )
)]
pub async fn job_events_handler(
    Extension(session): Extension<Arc<Session>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, HandlerError> {
    let job = find_job(&session, &job_id).await?;
    let mut subscription = job.subscribe();
    let job_id = job.id;

    let stream = async_stream::stream! {
        let mut finished = false;
        while !finished {
            // A closed channel means the job ended; a lagging client may have
            // missed the terminal event, so close with the final state.
            let progress = match subscription.recv().await {
                Some(progress) => progress,
                None => job.snapshot(),
            };
            finished = progress.status.is_terminal();
            match Event::default().json_data(&progress) {
                Ok(event) => yield Ok::<_, Infallible>(event),
                Err(e) => {
                    warn!("Failed to encode event of job {}: {}", job_id, e);
                    break;
                }
            }
        }
        debug!("Closing the event stream of job {}", job_id);
    };

    Ok((
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}
