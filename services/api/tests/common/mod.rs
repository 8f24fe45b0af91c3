//! Shared fixtures: an app wired to the scripted browser and counting assembler.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use api_lib::config::Config;
use api_lib::web::{build_router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response},
    Router,
};
use edubase_core::config::EdubaseConfig;
use edubase_core::domain::Credentials;
use edubase_core::testing::{CountingAssembler, ScriptedLauncher, ScriptedPage, ScriptedPageBuilder};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOOK_ID: i64 = 58216;

pub fn credentials() -> Credentials {
    Credentials::new("reader@example.com", "secret")
}

/// A platform with one three-page book that accepts [`credentials`].
pub fn platform() -> ScriptedPageBuilder {
    ScriptedPage::builder()
        .accept(credentials())
        .book(BOOK_ID.to_string(), "Mathematik 1")
        .book("1234", "Physik")
        .pages(3)
        .page_text(1, "Kapitel eins")
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub launcher: Arc<ScriptedLauncher>,
    pub assembler: Arc<CountingAssembler>,
    pub download_dir: TempDir,
}

impl TestApp {
    pub fn new(platform: ScriptedPageBuilder) -> Self {
        Self::with_assembler(platform, CountingAssembler::new())
    }

    pub fn with_assembler(platform: ScriptedPageBuilder, assembler: CountingAssembler) -> Self {
        let download_dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            download_dir: download_dir.path().to_path_buf(),
            ..Config::default()
        };
        let launcher = Arc::new(ScriptedLauncher::new(platform));
        let assembler = Arc::new(assembler);
        let state = Arc::new(AppState::new(
            Arc::new(config),
            Arc::new(EdubaseConfig::immediate()),
            launcher.clone(),
            assembler.clone(),
        ));
        Self {
            router: build_router(state.clone()),
            state,
            launcher,
            assembler,
            download_dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Creates a session and returns its id.
    pub async fn session(&self) -> String {
        let response = self.send(post_json("/api/session", Value::Null)).await;
        let body = json_body(response).await;
        body["session_id"].as_str().expect("session_id").to_string()
    }

    /// Creates a session and logs it in.
    pub async fn logged_in_session(&self) -> String {
        let session = self.session().await;
        let response = self
            .send(post_json(
                &format!("/api/login?session_id={}", session),
                serde_json::json!({"email": "reader@example.com", "password": "secret"}),
            ))
            .await;
        assert_eq!(response.status(), 200, "login failed");
        session
    }

    pub async fn start_download(&self, session: &str, book_id: i64) -> String {
        let response = self
            .send(post_json(
                &format!("/api/download?session_id={}", session),
                serde_json::json!({"book_id": book_id}),
            ))
            .await;
        assert_eq!(response.status(), 202);
        let body = json_body(response).await;
        body["job_id"].as_str().expect("job_id").to_string()
    }

    pub async fn job_status(&self, session: &str, job: &str) -> Value {
        let response = self
            .send(get(&format!("/api/download/{}?session_id={}", job, session)))
            .await;
        assert_eq!(response.status(), 200);
        json_body(response).await
    }

    /// Polls until the job reports `status`.
    pub async fn wait_for(&self, session: &str, job: &str, status: &str) -> Value {
        for _ in 0..500 {
            let body = self.job_status(session, job).await;
            if body["status"] == status {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job, status);
    }
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec()
}

pub async fn json_body(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}
