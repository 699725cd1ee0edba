//! Gateway surface tests
//!
//! Exercise routing and authentication without touching the container
//! runtime: requests are rejected (or answered, for /health) before any
//! engine work happens.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use isol8::config::EngineOptions;
use isol8::container::ContainerManager;
use isol8::engine::Engine;
use isol8::gateway;

fn test_router() -> axum::Router {
    let docker =
        bollard::Docker::connect_with_socket_defaults().expect("client construction is lazy");
    let engine = Engine::with_manager(ContainerManager::new(docker), EngineOptions::default());
    gateway::router(Arc::new(engine), "test-key".to_string())
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_requires_no_auth() {
    let response = test_router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].as_str().unwrap().contains('.'));
}

#[tokio::test]
async fn test_execute_without_auth_is_401() {
    let response = test_router()
        .oneshot(
            Request::post("/execute")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"request":{"code":"print(1)","runtime":"python"}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_execute_with_malformed_scheme_is_401() {
    let response = test_router()
        .oneshot(
            Request::post("/execute")
                .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"request":{"code":"print(1)","runtime":"python"}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_execute_with_wrong_key_is_403() {
    let response = test_router()
        .oneshot(
            Request::post("/execute")
                .header(header::AUTHORIZATION, "Bearer wrong-key")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"request":{"code":"print(1)","runtime":"python"}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = test_router()
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_route_requires_auth_too() {
    let response = test_router()
        .oneshot(
            Request::post("/execute/stream")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"request":{"code":"print(1)","runtime":"python"}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
