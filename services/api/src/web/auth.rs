//! services/api/src/web/auth.rs
//!
//! Session creation and platform login endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use edubase_core::auth::{Authenticator, LoginMode};
use edubase_core::domain::Credentials;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::web::{
    middleware::SESSION_COOKIE,
    protocol::{
        error_reply, CreateSessionResponse, ErrorResponse, HandlerError, LoginRequest, LoginResponse,
        DEFAULT_JOB_HEIGHT, DEFAULT_JOB_WIDTH,
    },
    session::Session,
    state::AppState,
};

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/session - Create a new session
#[utoipa::path(
    post,
    path = "/api/session",
    responses(
        (status = 200, description = "Session created; also set as the `session_id` cookie", body = CreateSessionResponse)
    )
)]
pub async fn create_session_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.sessions.create().await;
    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/",
        SESSION_COOKIE, session.id
    );

    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(CreateSessionResponse {
            session_id: session.id,
        }),
    )
}

/// POST /api/login - Log the session's browser into the platform
///
/// Launches the session browser on first use. The credentials are only used for
/// this login attempt.
#[utoipa::path(
    post,
    path = "/api/login",
    request_body = LoginRequest,
    params(("session_id" = Option<String>, Query, description = "Session id, unless sent as cookie")),
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Malformed body or missing fields", body = ErrorResponse),
        (status = 401, description = "Authentication failed", body = ErrorResponse),
        (status = 409, description = "The session browser is busy with a download", body = ErrorResponse),
        (status = 500, description = "The browser could not be started", body = ErrorResponse)
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<Session>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, HandlerError> {
    // 1. Validate the body before touching the browser
    let Json(req) = payload.map_err(|e| {
        error_reply(StatusCode::BAD_REQUEST, "invalid_json", e.body_text())
    })?;
    let credentials = Credentials::new(req.email.trim(), req.password);
    if credentials.email.is_empty() {
        return Err(error_reply(StatusCode::BAD_REQUEST, "validation_error", "email is required"));
    }
    if credentials.password.is_empty() {
        return Err(error_reply(StatusCode::BAD_REQUEST, "validation_error", "password is required"));
    }

    // 2. Take the browser; a running download holds it
    let mut browser = session.browser().try_lock().map_err(|_| {
        error_reply(
            StatusCode::CONFLICT,
            "session_busy",
            "A download is running in this session",
        )
    })?;

    // 3. Launch lazily
    let driver = match browser.as_ref() {
        Some(driver) => driver.clone(),
        None => {
            let options = state
                .config
                .launch_options(DEFAULT_JOB_WIDTH, DEFAULT_JOB_HEIGHT);
            let driver = state.launcher.launch(&options).await.map_err(|e| {
                error!("Failed to launch browser for session {}: {}", session.id, e);
                error_reply(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "browser_error",
                    "Failed to start the browser",
                )
            })?;
            *browser = Some(driver.clone());
            driver
        }
    };

    // 4. Authenticate
    let mode = LoginMode::Credentials(credentials);
    match Authenticator::new(driver.as_ref(), &state.edubase).login(&mode).await {
        Ok(()) => {
            info!("Session {} logged in", session.id);
            session.set_authenticated(true);
            Ok(Json(LoginResponse {
                success: true,
                message: "Login successful".to_string(),
            }))
        }
        Err(e) => {
            warn!("Login failed for session {}: {}", session.id, e);
            session.set_authenticated(false);
            Err(error_reply(
                StatusCode::UNAUTHORIZED,
                "auth_failed",
                "Authentication failed",
            ))
        }
    }
}
