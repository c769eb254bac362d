//! HTTP surface tests

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use sketchdeploy::server::serve::router;
use sketchdeploy::server::state::ServerState;
use sketchdeploy::session::OrchestratorSession;

use common::{request, successful_build, wired_target, Harness, UNO};

fn app(session: Arc<OrchestratorSession>) -> axum::Router {
    router(Arc::new(ServerState::new(session, "1.2.3".to_string())))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::default();
    let response = app(Arc::new(h.session()))
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "1.2.3");
}

#[tokio::test]
async fn test_verify_then_status() {
    let h = Harness::default();
    h.builder.script("C1", successful_build());
    let session = Arc::new(h.session());

    let payload = serde_json::to_vec(&request(wired_target(UNO))).unwrap();
    let response = app(session.clone())
        .oneshot(
            Request::post("/verify")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    session.wait_idle().await;

    let response = app(session)
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"]["status"], "success");
    assert_eq!(body["compile"]["state"], "succeeded");
    assert_eq!(body["settled"], true);
    assert_eq!(body["progress"], 100);
}

#[tokio::test]
async fn test_malformed_request_is_rejected() {
    let h = Harness::default();
    let response = app(Arc::new(h.session()))
        .oneshot(
            Request::post("/upload")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.builder.calls().is_empty());
}

#[tokio::test]
async fn test_abort_without_ota() {
    let h = Harness::default();
    let response = app(Arc::new(h.session()))
        .oneshot(Request::post("/ota/abort").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "nothing to abort");
}
