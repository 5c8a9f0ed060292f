//! API integration tests over in-memory components.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use mediaflow_api::{create_router, ApiConfig, AppState};
use mediaflow_db::{InMemoryStore, MediaStore};
use mediaflow_models::{MediaId, MediaStatus, RecordingObserver, TaskMessage, TaskStatus};
use mediaflow_queue::InMemoryTransport;
use mediaflow_storage::InMemoryObjectStore;

struct TestApp {
    router: Router,
    store: Arc<InMemoryStore>,
    transport: Arc<InMemoryTransport>,
}

fn create_test_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let state = AppState::with_components(
        ApiConfig::default(),
        store.clone(),
        Arc::new(InMemoryObjectStore::new()),
        transport.clone(),
        Arc::new(RecordingObserver::new()),
    );
    TestApp {
        router: create_router(state, None),
        store,
        transport,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Test health endpoint.
#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();
    let (status, body) = send(&app.router, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

/// Test readiness reports each dependency.
#[tokio::test]
async fn test_ready_endpoint() {
    let app = create_test_app();
    let (status, body) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["database"]["status"], "ok");

    app.transport.set_unavailable(true);
    let (status, body) = send(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["queue"]["status"], "error");
}

/// Test the upload intent creates an INIT media item.
#[tokio::test]
async fn test_upload_url_creates_media() {
    let app = create_test_app();
    let (status, body) = send(
        &app.router,
        post_json(
            "/upload-url",
            json!({"content_type": "image/png", "file_name": "cat.png"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let media_id = body["media_id"].as_str().unwrap().to_string();
    assert_eq!(
        body["original_key"],
        format!("media/{}/original.png", media_id)
    );
    assert_eq!(body["expires_in"], 300);
    assert!(body["upload_url"].as_str().unwrap().contains("original.png"));

    let media = app
        .store
        .get_media(&MediaId::from(media_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(media.status, MediaStatus::Init);
}

/// Test non-image uploads are rejected.
#[tokio::test]
async fn test_upload_url_rejects_non_images() {
    let app = create_test_app();
    let (status, body) = send(
        &app.router,
        post_json("/upload-url", json!({"content_type": "application/pdf"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("image/*"));
}

/// Test completion dispatches the first step exactly once.
#[tokio::test]
async fn test_complete_upload_dispatches_once() {
    let app = create_test_app();
    let (_, intent) = send(&app.router, post_json("/upload-url", json!({}))).await;
    let media_id = intent["media_id"].as_str().unwrap().to_string();
    let original_key = intent["original_key"].as_str().unwrap().to_string();
    assert!(original_key.ends_with("original.bin"));

    for _ in 0..2 {
        let (status, body) = send(
            &app.router,
            post_json(
                "/complete-upload",
                json!({"media_id": media_id, "original_key": original_key}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "PROCESSING");
    }

    let tasks = app.store.tasks_for_media(&MediaId::from(media_id.as_str()));
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].step, "resize");
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert_eq!(tasks[0].input_key, original_key);

    let bodies = app.transport.ready_bodies();
    assert_eq!(bodies.len(), 1);
    let pointer = TaskMessage::from_bytes(&bodies[0]).unwrap();
    assert_eq!(pointer.task_id, tasks[0].id);
}

/// Test completion can be repeated after the queue was unreachable.
#[tokio::test]
async fn test_complete_upload_retry_after_queue_outage() {
    let app = create_test_app();
    let (_, intent) = send(&app.router, post_json("/upload-url", json!({}))).await;
    let request = json!({
        "media_id": intent["media_id"],
        "original_key": intent["original_key"],
    });

    app.transport.set_unavailable(true);
    let (status, _) = send(&app.router, post_json("/complete-upload", request.clone())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    app.transport.set_unavailable(false);

    let (status, _) = send(&app.router, post_json("/complete-upload", request)).await;
    assert_eq!(status, StatusCode::OK);

    let media_id = MediaId::from(intent["media_id"].as_str().unwrap());
    assert_eq!(app.store.tasks_for_media(&media_id).len(), 1);
    assert_eq!(app.transport.published(), 1);
}

/// Test completion validates its input.
#[tokio::test]
async fn test_complete_upload_validation() {
    let app = create_test_app();
    let (status, _) = send(
        &app.router,
        post_json("/complete-upload", json!({"media_id": "m1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json(
            "/complete-upload",
            json!({"media_id": "missing", "original_key": "media/missing/original.png"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.transport.published(), 0);
}

/// Test media status and final URL.
#[tokio::test]
async fn test_get_media() {
    let app = create_test_app();
    let (status, _) = send(&app.router, get("/media/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, intent) = send(&app.router, post_json("/upload-url", json!({}))).await;
    let media_id = intent["media_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app.router, get(&format!("/media/{}", media_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "INIT");
    assert!(body.get("final_url").is_none());

    app.store
        .complete_media(&MediaId::from(media_id.as_str()), "media/x/resize.jpg")
        .await
        .unwrap();
    let (_, body) = send(&app.router, get(&format!("/media/{}", media_id))).await;
    assert_eq!(body["status"], "DONE");
    assert!(body["final_url"]
        .as_str()
        .unwrap()
        .contains("media/x/resize.jpg"));
}

/// Test metrics route is absent when no handle is installed.
#[tokio::test]
async fn test_metrics_disabled() {
    let app = create_test_app();
    let (status, _) = send(&app.router, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
