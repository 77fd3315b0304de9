//! Router tests driven through `tower::ServiceExt::oneshot`.

#![cfg(unix)]

use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use smelt_core::{CompileService, ServiceConfig, Toolchain};
use smelt_server::{AppState, create_router};
use tempfile::TempDir;
use tower::ServiceExt;

const FAKE_COMPILER: &str = r#"#!/bin/sh
src="$1"
case "$(cat "$src")" in
  *FAIL*) echo "$src(4) : error 010: invalid function or declaration"; exit 1 ;;
esac
cat "$src" > "${src%.sma}.amxx"
exit 0
"#;

struct TestServer {
    _temp: TempDir,
    router: Router,
}

impl TestServer {
    fn new(configure: impl FnOnce(&mut ServiceConfig), trust_forwarded: bool) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let compiler = temp.path().join("amxxpc");
        std::fs::write(&compiler, FAKE_COMPILER).unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = ServiceConfig::with_work_dir(temp.path().join("work"));
        config.worker_pool_size = 4;
        config.compile_timeout = Duration::from_secs(5);
        configure(&mut config);

        let service = CompileService::with_toolchain(config, Toolchain::from_path(compiler));
        let router = create_router(Arc::new(AppState::new(service, trust_forwarded)));
        Self {
            _temp: temp,
            router,
        }
    }

    fn standard() -> Self {
        Self::new(|_| {}, false)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }
}

fn compile(body: Value) -> Request<Body> {
    compile_from(body, None)
}

fn compile_from(body: Value, forwarded_for: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/compile")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(ip) = forwarded_for {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::standard();
    let (status, body) = server.json(get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["limits"]["maxPlugins"], 10);
    assert_eq!(body["limits"]["workers"], 4);
}

#[tokio::test]
async fn test_compile_download_info_roundtrip() {
    let server = TestServer::standard();

    let (status, body) = server
        .json(compile(json!({
            "plugins": [
                { "name": "admin", "code": "admin source" },
                { "name": "broken", "code": "FAIL" },
            ]
        })))
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["summary"]["total"], 2);
    assert_eq!(body["summary"]["succeeded"], 1);
    assert_eq!(body["summary"]["failed"], 1);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["name"], "admin");
    assert_eq!(results[0]["status"], "succeeded");
    assert_eq!(results[0]["moduleAvailable"], true);
    assert_eq!(results[0]["sizeBytes"], "admin source".len());
    assert_eq!(results[1]["status"], "failed");
    assert_eq!(results[1]["errors"], 1);
    assert_eq!(results[1]["diagnostics"][0]["line"], 4);
    assert_eq!(results[1]["diagnostics"][0]["code"], "010");

    let id = body["compilationId"].as_str().unwrap().to_string();
    let url = body["download"]["url"].as_str().unwrap().to_string();
    assert_eq!(url, format!("/download/{id}"));
    assert_eq!(
        body["download"]["filename"],
        format!("compiled_plugins_{id}.zip")
    );

    let (status, headers, first) = server.send(get(&url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"compiled_plugins_{id}.zip\"")
    );
    let archive = zip::ZipArchive::new(Cursor::new(first.clone())).unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(archive.file_names().collect::<Vec<_>>(), ["admin.amxx"]);

    let (_, _, second) = server.send(get(&url)).await;
    assert_eq!(first, second);

    let (status, info_a) = server.json(get(&format!("/info/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, info_b) = server.json(get(&format!("/info/{id}"))).await;
    assert_eq!(info_a, info_b);
    assert_eq!(info_a["compilationId"], id);
    assert_eq!(info_a["createdAt"], body["createdAt"]);
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let server = TestServer::standard();

    let (status, body) = server.json(get("/download/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = server.json(get("/info/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_all_failed_download() {
    let server = TestServer::standard();
    let (status, body) = server
        .json(compile(json!({ "plugins": [{ "name": "x", "code": "FAIL" }] })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["download"].is_null());

    let id = body["compilationId"].as_str().unwrap();
    let (status, body) = server.json(get(&format!("/download/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no_artifacts");
}

#[tokio::test]
async fn test_validation_errors() {
    let server = TestServer::standard();

    let plugins: Vec<_> = (0..11)
        .map(|i| json!({ "name": format!("p{i}"), "code": "x" }))
        .collect();
    let (status, body) = server.json(compile(json!({ "plugins": plugins }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = server.json(compile(json!({ "plugins": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .json(compile(json!({ "plugins": [{ "name": "../x", "code": "x" }] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("../x"));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/compile")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = server.json(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_body_limit() {
    let server = TestServer::new(|c| c.limits.max_body_bytes = 64, false);
    let code = "x".repeat(200);
    let (status, body) = server
        .json(compile(json!({ "plugins": [{ "code": code }] })))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload_too_large");
}

#[tokio::test]
async fn test_rate_limit_per_forwarded_client() {
    let server = TestServer::new(|c| c.rate_limit.max_requests = 2, true);
    let request = || json!({ "plugins": [{ "name": "a", "code": "a" }] });

    for _ in 0..2 {
        let (status, _) = server.json(compile_from(request(), Some("198.51.100.1"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, body) = server
        .send(compile_from(request(), Some("198.51.100.1")))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!((1..=120).contains(&retry));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "rate_limited");

    // Another client is unaffected
    let (status, _) = server
        .json(compile_from(request(), Some("198.51.100.2, 10.0.0.1")))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, stats) = server.json(get("/stats")).await;
    assert_eq!(stats["totalCompilations"], 3);
    assert_eq!(stats["rateLimited"], 1);
    assert_eq!(stats["activeCompilations"], 3);
    assert_eq!(stats["fileRetentionSeconds"], 600);
}

#[tokio::test]
async fn test_rate_limited_before_validation() {
    let server = TestServer::new(|c| c.rate_limit.max_requests = 1, false);

    let (status, _) = server.json(compile(json!({ "plugins": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Invalid requests still count toward the window
    let (status, _) = server.json(compile(json!({ "plugins": [] }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_delete_compilation() {
    let server = TestServer::standard();
    let (_, body) = server
        .json(compile(json!({ "plugins": [{ "name": "a", "code": "a" }] })))
        .await;
    let id = body["compilationId"].as_str().unwrap();

    let delete = |id: &str| {
        Request::builder()
            .method(Method::DELETE)
            .uri(format!("/compilations/{id}"))
            .body(Body::empty())
            .unwrap()
    };

    let (status, _, _) = server.send(delete(id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = server.json(get(&format!("/download/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = server.send(delete(id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
