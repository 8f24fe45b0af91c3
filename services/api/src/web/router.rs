//! services/api/src/web/router.rs
//!
//! Assembles every route of the HTTP server.

use std::sync::Arc;

use axum::{
    http::{header, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::web::{
    auth::{create_session_handler, login_handler},
    events::job_events_handler,
    middleware::require_session,
    rest::{books_handler, job_pdf_handler, job_status_handler, start_download_handler, ApiDoc},
    single_shot::{download_handler, health_handler, health_method_not_allowed, method_not_allowed},
    state::AppState,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // Routes that act on the caller's session
    let session_routes = Router::new()
        .route("/api/login", post(login_handler))
        .route("/api/books", get(books_handler))
        .route("/api/download", post(start_download_handler))
        .route("/api/download/{job_id}", get(job_status_handler))
        .route("/api/download/{job_id}/pdf", get(job_pdf_handler))
        .route("/api/download/{job_id}/events", get(job_events_handler))
        .route_layer(from_fn_with_state(state.clone(), require_session));

    let public_routes = Router::new()
        .route("/api/session", post(create_session_handler))
        .route(
            "/health",
            get(health_handler).fallback(health_method_not_allowed),
        )
        .route(
            "/download",
            post(download_handler)
                .fallback(method_not_allowed)
                .layer(TimeoutLayer::new(state.config.single_shot_timeout)),
        );

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public_routes)
        .merge(session_routes)
        .layer(cors)
        .with_state(state)
}
