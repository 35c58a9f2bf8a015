//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use deck2lecture::api;
use http_body_util::BodyExt;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "deck2lecture-test-boundary";

fn multipart_body(filename: &str, bytes: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// An upload arriving from socket peer `peer`, optionally carrying an
/// `X-Forwarded-For` header.
fn upload_via(filename: &str, bytes: &[u8], peer: &str, forwarded: Option<&str>) -> Request<Body> {
    let ip: IpAddr = peer.parse().unwrap();
    let mut request = Request::post("/api/v1/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .extension(ConnectInfo(SocketAddr::new(ip, 40_000)));
    if let Some(hops) = forwarded {
        request = request.header("x-forwarded-for", hops);
    }
    request
        .body(Body::from(multipart_body(filename, bytes, &[])))
        .unwrap()
}

fn upload_request(filename: &str, bytes: &[u8], peer: &str) -> Request<Body> {
    upload_via(filename, bytes, peer, None)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, bytes)
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, bytes) = send(app, request).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn upload_ok(app: &Router, tag: &str, client: &str) -> String {
    let (status, json) = send_json(app, upload_request("deck.pdf", &pdf_bytes(tag), client)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    json["session_id"].as_str().unwrap().to_string()
}

async fn poll_complete(app: &Router, id: &str) -> Value {
    for _ in 0..500 {
        let (status, json) = send_json(app, get(&format!("/api/v1/session/{id}/status"))).await;
        assert_eq!(status, StatusCode::OK);
        if json["complete"] == true || json["phase"] == "error" || json["phase"] == "canceled" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {id} did not finish");
}

fn app() -> (Harness, Router) {
    let h = Harness::new(MockParser::with_slides(3), MockAi::default(), MockTts::default());
    let router = api::router(h.orchestrator.clone());
    (h, router)
}

// ── Upload and retrieval ─────────────────────────────────────────────────────

#[tokio::test]
async fn upload_then_fetch_lecture() {
    let (_h, app) = app();
    let id = upload_ok(&app, "api-e2e", "10.1.1.1").await;

    let status = poll_complete(&app, &id).await;
    assert_eq!(status["phase"], "complete");
    assert_eq!(status["progress"], 100.0);
    assert_eq!(status["total_slides"], 3);

    let (code, lecture) = send_json(&app, get(&format!("/api/v1/session/{id}/lecture"))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(lecture["total_slides"], 3);
    assert_eq!(lecture["narrations"].as_array().unwrap().len(), 3);
    assert!(lecture["word_timings"]["2"]["entries"].is_array());
    assert_eq!(lecture["tts_provider"], "mock");

    let (code, headers, bytes) = send(&app, get(&format!("/api/v1/session/{id}/slide/0"))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert!(bytes.starts_with(b"\x89PNG"));

    let (code, headers, _) = send(&app, get(&format!("/api/v1/session/{id}/audio/1"))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");

    let (code, _) = send_json(&app, get(&format!("/api/v1/session/{id}/slide/7"))).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_options_are_recorded() {
    let (_h, app) = app();
    let body = multipart_body(
        "deck.pdf",
        &pdf_bytes("options"),
        &[("enable_vision", "true"), ("tts_provider", "mock")],
    );
    let request = Request::post("/api/v1/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (code, json) = send_json(&app, request).await;
    assert_eq!(code, StatusCode::OK, "{json}");
    let id = json["session_id"].as_str().unwrap().to_string();
    poll_complete(&app, &id).await;

    let (_, lecture) = send_json(&app, get(&format!("/api/v1/session/{id}/lecture"))).await;
    assert_eq!(lecture["vision_enabled"], true);
}

#[tokio::test]
async fn bad_vision_flag_is_rejected() {
    let (_h, app) = app();
    let body = multipart_body("deck.pdf", &pdf_bytes("flag"), &[("enable_vision", "maybe")]);
    let request = Request::post("/api/v1/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (code, json) = send_json(&app, request).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("enable_vision"));
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_session_is_404() {
    let (_h, app) = app();
    for uri in [
        "/api/v1/session/does-not-exist/status",
        "/api/v1/session/2f1b7f4e-51a4-4c43-9d34-1d7e2bcd0e11/lecture",
        "/api/v1/session/2f1b7f4e-51a4-4c43-9d34-1d7e2bcd0e11/events",
    ] {
        let (code, json) = send_json(&app, get(uri)).await;
        assert_eq!(code, StatusCode::NOT_FOUND, "{uri}");
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn wrong_extension_is_400() {
    let (_h, app) = app();
    let (code, json) = send_json(&app, upload_request("notes.txt", b"hello", "192.0.2.10")).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("notes.txt"));
}

#[tokio::test]
async fn missing_file_field_is_400() {
    let (_h, app) = app();
    let request = Request::post("/api/v1/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(format!("--{BOUNDARY}--\r\n")))
        .unwrap();
    let (code, _) = send_json(&app, request).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path()).max_file_size(1024).build().unwrap();
    let h = Harness::with_config(
        dir,
        config,
        MockParser::with_slides(1),
        MockAi::default(),
        MockTts::default(),
    );
    let app = api::router(h.orchestrator.clone());

    let mut bytes = pdf_bytes("big");
    bytes.resize(1500, b' ');
    let (code, json) = send_json(&app, upload_request("big.pdf", &bytes, "192.0.2.10")).await;
    assert_eq!(code, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(json["error"].as_str().unwrap().contains("1024"));
}

#[tokio::test]
async fn rate_limited_upload_is_429_with_retry_after() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path())
        .rate_limit(1, Duration::from_secs(3600))
        .build()
        .unwrap();
    let h = Harness::with_config(
        dir,
        config,
        MockParser::with_slides(1),
        MockAi::default(),
        MockTts::default(),
    );
    let app = api::router(h.orchestrator.clone());

    let id = upload_ok(&app, "quota-1", "203.0.113.9").await;
    poll_complete(&app, &id).await;

    let (code, headers, _) = send(&app, upload_request("deck.pdf", &pdf_bytes("quota-2"), "203.0.113.9")).await;
    assert_eq!(code, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 3600);

    // Without a trusted proxy a client cannot rename itself.
    for (i, forged) in ["198.51.100.4", "198.51.100.5, 10.0.0.1"].iter().enumerate() {
        let request = upload_via("deck.pdf", &pdf_bytes(&format!("forged-{i}")), "203.0.113.9", Some(forged));
        let (code, _) = send_json(&app, request).await;
        assert_eq!(code, StatusCode::TOO_MANY_REQUESTS);
    }

    // A different peer has its own quota.
    upload_ok(&app, "quota-3", "198.51.100.4").await;
}

#[tokio::test]
async fn trusted_proxy_identifies_clients_by_first_forwarded_hop() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path())
        .rate_limit(1, Duration::from_secs(3600))
        .trust_forwarded_for(true)
        .build()
        .unwrap();
    let h = Harness::with_config(
        dir,
        config,
        MockParser::with_slides(1),
        MockAi::default(),
        MockTts::default(),
    );
    let app = api::router(h.orchestrator.clone());
    let proxy = "10.0.0.1";

    let (code, _) = send_json(&app, upload_via("deck.pdf", &pdf_bytes("proxied-1"), proxy, Some("203.0.113.9"))).await;
    assert_eq!(code, StatusCode::OK);
    let (code, _) = send_json(&app, upload_via("deck.pdf", &pdf_bytes("proxied-2"), proxy, Some("203.0.113.9"))).await;
    assert_eq!(code, StatusCode::TOO_MANY_REQUESTS);

    let (code, _) = send_json(
        &app,
        upload_via("deck.pdf", &pdf_bytes("proxied-3"), proxy, Some("198.51.100.4, 203.0.113.9")),
    )
    .await;
    assert_eq!(code, StatusCode::OK);

    // Requests without the header fall back to the peer.
    let (code, _) = send_json(&app, upload_request("deck.pdf", &pdf_bytes("proxied-4"), proxy)).await;
    assert_eq!(code, StatusCode::OK);
}

#[tokio::test]
async fn cancel_after_complete_is_409() {
    let (_h, app) = app();
    let id = upload_ok(&app, "late-cancel", "192.0.2.10").await;
    poll_complete(&app, &id).await;

    let request = Request::post(format!("/api/v1/session/{id}/cancel"))
        .body(Body::empty())
        .unwrap();
    let (code, json) = send_json(&app, request).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("complete"));
}

// ── Listing and deletion ─────────────────────────────────────────────────────

#[tokio::test]
async fn tts_providers_lists_registered_engines() {
    let (_h, app) = app();
    let (code, json) = send_json(&app, get("/api/v1/tts/providers")).await;
    assert_eq!(code, StatusCode::OK);
    let providers = json.as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["name"], "mock");
    assert_eq!(providers[0]["default_voice"], MOCK_VOICE);
}

#[tokio::test]
async fn sessions_lists_completed_lectures_and_delete_removes_them() {
    let (_h, app) = app();
    let id = upload_ok(&app, "listed", "192.0.2.10").await;
    poll_complete(&app, &id).await;

    let (code, json) = send_json(&app, get("/api/v1/sessions")).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(json[0]["session_id"], id.as_str());
    assert_eq!(json[0]["filename"], "deck.pdf");
    assert_eq!(json[0]["total_slides"], 3);

    let request = Request::delete(format!("/api/v1/session/{id}"))
        .body(Body::empty())
        .unwrap();
    let (code, _, body) = send(&app, request).await;
    assert_eq!(code, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let (code, _) = send_json(&app, get(&format!("/api/v1/session/{id}/status"))).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    let (_, json) = send_json(&app, get("/api/v1/sessions")).await;
    assert_eq!(json, Value::Array(vec![]));
}

#[tokio::test]
async fn events_stream_ends_with_terminal_status() {
    let (_h, app) = app();
    let id = upload_ok(&app, "sse", "192.0.2.10").await;
    poll_complete(&app, &id).await;

    let (code, headers, body) = send(&app, get(&format!("/api/v1/session/{id}/events"))).await;
    assert_eq!(code, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("event: status"));
    assert!(text.contains("\"phase\":\"complete\""));
}
