use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use httpmock::prelude::*;
use reqwest::Client;
use serde_json::json;

use sds_gateway_api::fetch_json_with_wake;

#[tokio::test]
async fn success_response_is_decoded() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/parse-sds");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(json!({"status": "parsed"}));
    });

    let client = Client::new();
    let request = client.post(server.url("/parse-sds")).build().unwrap();
    let outcome = fetch_json_with_wake(&client, request, None).await.unwrap();

    mock.assert();
    assert!(outcome.ok);
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.json.unwrap()["status"], "parsed");
    assert!(outcome.content_type.unwrap().starts_with("application/json"));
}

#[tokio::test]
async fn non_json_body_keeps_raw_text() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/broken");
        then.status(200).body("<html>oops</html>");
    });

    let client = Client::new();
    let request = client.get(server.url("/broken")).build().unwrap();
    let outcome = fetch_json_with_wake(&client, request, None).await.unwrap();

    mock.assert();
    assert!(outcome.json.is_none());
    assert_eq!(outcome.text, "<html>oops</html>");
}

#[tokio::test]
async fn dormant_backend_gets_one_wake_and_one_retry() {
    let server = MockServer::start();
    // Matching on the body proves the retry replays the original payload.
    let parse_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/parse-sds")
            .json_body(json!({"product_id": 1, "sds_url": "https://x/y.pdf"}));
        then.status(503);
    });
    let wake_mock = server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let client = Client::new();
    let request = client
        .post(server.url("/parse-sds"))
        .json(&json!({"product_id": 1, "sds_url": "https://x/y.pdf"}))
        .build()
        .unwrap();
    let wake_url = server.url("/health");
    let outcome = fetch_json_with_wake(&client, request, Some(&wake_url))
        .await
        .unwrap();

    // One retry even though the retry hit the dormancy signature again.
    parse_mock.assert_hits(2);
    wake_mock.assert_hits(1);
    assert!(!outcome.ok);
    assert_eq!(outcome.status, 503);
}

#[tokio::test]
async fn retry_happens_even_without_a_wake_url() {
    let server = MockServer::start();
    let parse_mock = server.mock(|when, then| {
        when.method(POST).path("/parse-sds");
        then.status(503);
    });

    let client = Client::new();
    let request = client.post(server.url("/parse-sds")).build().unwrap();
    let outcome = fetch_json_with_wake(&client, request, None).await.unwrap();

    parse_mock.assert_hits(2);
    assert_eq!(outcome.status, 503);
}

#[tokio::test]
async fn a_503_with_a_body_is_not_retried() {
    let server = MockServer::start();
    let parse_mock = server.mock(|when, then| {
        when.method(POST).path("/parse-sds");
        then.status(503).body("maintenance window");
    });
    let wake_mock = server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(200);
    });

    let client = Client::new();
    let request = client.post(server.url("/parse-sds")).build().unwrap();
    let wake_url = server.url("/health");
    let outcome = fetch_json_with_wake(&client, request, Some(&wake_url))
        .await
        .unwrap();

    parse_mock.assert_hits(1);
    wake_mock.assert_hits(0);
    assert_eq!(outcome.status, 503);
    assert_eq!(outcome.text, "maintenance window");
}

#[tokio::test]
async fn a_whitespace_only_503_body_counts_as_dormant() {
    let server = MockServer::start();
    let parse_mock = server.mock(|when, then| {
        when.method(POST).path("/parse-sds");
        then.status(503).body("  \n");
    });

    let client = Client::new();
    let request = client.post(server.url("/parse-sds")).build().unwrap();
    let outcome = fetch_json_with_wake(&client, request, None).await.unwrap();

    parse_mock.assert_hits(2);
    assert_eq!(outcome.status, 503);
}

#[tokio::test]
async fn recovers_when_the_backend_wakes_up() {
    let base = spawn_flaky_backend().await;

    let client = Client::new();
    let request = client
        .post(format!("{}/parse-sds", base))
        .json(&json!({"product_id": 5, "sds_url": "https://x/y.pdf", "force": false}))
        .build()
        .unwrap();
    let wake_url = format!("{}/health", base);
    let outcome = fetch_json_with_wake(&client, request, Some(&wake_url))
        .await
        .unwrap();

    assert!(outcome.ok);
    assert_eq!(outcome.status, 200);
    let body = outcome.json.unwrap();
    assert_eq!(body["product_id"], 5);
    assert_eq!(body["status"], "parsed");
}

/// A stub backend that replies 503 with an empty body on the first parse call
/// and a normal parse result afterwards, like a dyno waking up.
async fn spawn_flaky_backend() -> String {
    let calls = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route(
            "/parse-sds",
            post(move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, String::new()).into_response()
                    } else {
                        Json(json!({"product_id": 5, "status": "parsed"})).into_response()
                    }
                }
            }),
        )
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}
