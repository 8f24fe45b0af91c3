//! services/api/src/web/middleware.rs
//!
//! Session resolution for the `/api` routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::web::{protocol::error_reply, state::AppState};

pub const SESSION_COOKIE: &str = "session_id";

/// Middleware that resolves the caller's session.
///
/// The id comes from the `session_id` query parameter or, failing that, the
/// `session_id` cookie. A well-formed id that is not (or no longer) known gets a
/// fresh empty session. The session is inserted into the request extensions.
/// A missing or malformed id returns 401 Unauthorized.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(session_id) = session_id_from_query(req.uri().query())
        .or_else(|| session_id_from_cookie(req.headers().get(header::COOKIE)))
    else {
        return error_reply(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "session_id query parameter or cookie required",
        )
        .into_response();
    };

    let session = state.sessions.get_or_create(session_id).await;
    session.touch();
    req.extensions_mut().insert(session);

    next.run(req).await
}

fn session_id_from_query(query: Option<&str>) -> Option<Uuid> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("session_id="))
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

fn session_id_from_cookie(cookie_header: Option<&header::HeaderValue>) -> Option<Uuid> {
    cookie_header?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session_id="))
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_the_id_from_the_query() {
        let id = Uuid::new_v4();
        let query = format!("foo=1&session_id={}", id);
        assert_eq!(session_id_from_query(Some(&query)), Some(id));
        assert_eq!(session_id_from_query(Some("session_id=nope")), None);
        assert_eq!(session_id_from_query(None), None);
    }

    #[test]
    fn reads_the_id_from_the_cookie() {
        let id = Uuid::new_v4();
        let header = HeaderValue::from_str(&format!("theme=dark; session_id={}", id)).unwrap();
        assert_eq!(session_id_from_cookie(Some(&header)), Some(id));
        let other = HeaderValue::from_static("theme=dark");
        assert_eq!(session_id_from_cookie(Some(&other)), None);
    }
}
