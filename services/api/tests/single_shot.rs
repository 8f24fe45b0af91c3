//! The stateless `/download` endpoint and the health check.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::*;
use edubase_core::testing::CountingAssembler;
use serde_json::json;

fn request(max_pages: i64) -> serde_json::Value {
    json!({
        "email": "reader@example.com",
        "password": "secret",
        "book_id": BOOK_ID,
        "start_page": 1,
        "max_pages": max_pages
    })
}

#[tokio::test]
async fn health_answers_get_only() {
    let app = TestApp::new(platform());
    let response = app.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "ok"}));

    let response = app.send(post_json("/health", json!({}))).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json_body(response).await["error"], "method_not_allowed");
}

#[tokio::test]
async fn download_answers_post_only() {
    let app = TestApp::new(platform());
    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let response = app
            .send(Request::builder().method(method).uri("/download").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            json_body(response).await,
            json!({"error": "method_not_allowed", "message": "Only POST method is allowed"})
        );
    }
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = TestApp::new(platform());
    let response = app.send(post_raw("/download", "{\"email\": ")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({"error": "invalid_json", "message": "Invalid JSON request body"})
    );
}

#[tokio::test]
async fn zero_max_pages_is_rejected_before_any_browser_starts() {
    let app = TestApp::new(platform());
    let response = app.send(post_json("/download", request(0))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({
            "error": "validation_error",
            "message": "max_pages must be -1 (all pages) or a positive integer"
        })
    );
    assert_eq!(app.launcher.launch_count(), 0);
}

#[tokio::test]
async fn validation_reports_the_first_problem() {
    let app = TestApp::new(platform());
    let cases = [
        (json!({}), "email is required"),
        (json!({"email": "a@b.c"}), "password is required"),
        (json!({"email": "a@b.c", "password": "x", "book_id": -1}), "book_id must be a positive integer"),
        (
            json!({"email": "a@b.c", "password": "x", "book_id": 1, "start_page": 0, "max_pages": -1}),
            "start_page must be a positive integer",
        ),
    ];
    for (body, message) in cases {
        let response = app.send(post_json("/download", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["message"], message);
    }
    assert_eq!(app.launcher.launch_count(), 0);
}

#[tokio::test]
async fn rejected_credentials_are_unauthorized() {
    let app = TestApp::new(platform());
    let mut body = request(1);
    body["password"] = json!("wrong");

    let response = app.send(post_json("/download", body)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "auth_failed");
    assert!(app.launcher.last_page().unwrap().is_closed());
}

#[tokio::test]
async fn one_page_download_streams_the_pdf() {
    let app = TestApp::new(platform());
    let response = app.send(post_json("/download", request(1))).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    let length: usize = response.headers()[header::CONTENT_LENGTH]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let pdf = body_bytes(response).await;
    assert_eq!(pdf.len(), length);
    assert_eq!(String::from_utf8(pdf).unwrap().lines().count(), 1);

    let options = app.launcher.launch_options();
    assert_eq!(options.len(), 1);
    assert!(options[0].headless);
    assert_eq!((options[0].width, options[0].height), (2560, 1440));
    assert!(app.launcher.last_page().unwrap().is_closed());

    // The scratch directory goes away with the response body.
    let appended = app.assembler.appended();
    let scratch = appended[0].pdf.parent().unwrap().to_path_buf();
    assert!(!scratch.exists());
}

#[tokio::test]
async fn whole_book_is_downloaded_with_max_pages_minus_one() {
    let app = TestApp::new(platform());
    let response = app.send(post_json("/download", request(-1))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let pdf = body_bytes(response).await;
    assert_eq!(String::from_utf8(pdf).unwrap().lines().count(), 3);
    assert_eq!(app.launcher.last_page().unwrap().captured_pages(), vec![1, 2, 3]);
}

#[tokio::test]
async fn page_count_mismatch_is_a_processing_error() {
    let app = TestApp::with_assembler(platform(), CountingAssembler::new().with_skew(1));
    let response = app.send(post_json("/download", request(2))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await,
        json!({"error": "processing_error", "message": "Failed to process request"})
    );
}

#[tokio::test]
async fn browser_failures_are_processing_errors() {
    let app = TestApp::new(platform().fail_next_on(1));
    let response = app.send(post_json("/download", request(-1))).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.launcher.last_page().unwrap().is_closed());
}
