/// Router-level tests for the generic middleware chain: request-id
/// correlation, error body shape, fallback behavior, router priority and
/// panic recovery. These run against a service-free router.
use axum::{
    body::Body,
    extract::Path,
    http::{header, Request, StatusCode},
    middleware::from_fn,
    routing::get,
    Router,
};
use gee_api::api::middleware::{access_log, request_id, track_metrics, PanicResponder};
use gee_api::error::ApiError;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;

async fn boom() -> &'static str {
    panic!("boom")
}

fn test_router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/:code",
            get(|Path(code): Path<String>| async move { format!("code:{}", code) }),
        )
        .route("/panic", get(boom))
        .route("/missing", get(|| async { ApiError::ShortlinkNotFound }))
        .route_layer(from_fn(track_metrics))
        .fallback(|| async { ApiError::NotFound })
        .layer(from_fn(access_log))
        .layer(CatchPanicLayer::custom(PanicResponder))
        .layer(from_fn(request_id))
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_request_id_is_echoed_unchanged() {
    let res = test_router()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "my-fixed-id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-request-id").unwrap(), "my-fixed-id");
}

#[tokio::test]
async fn test_request_id_is_generated_when_absent() {
    let res = test_router()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let rid = res.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(rid.len(), 32);
    assert!(rid.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn test_static_route_beats_param_route() {
    let res = test_router()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");

    let res = test_router()
        .oneshot(Request::builder().uri("/abc123").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"code:abc123");
}

#[tokio::test]
async fn test_error_body_carries_request_id() {
    let res = test_router()
        .oneshot(
            Request::builder()
                .uri("/missing")
                .header("x-request-id", "rid-404")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body_json(res).await;
    assert_eq!(body["code"], "NotFound");
    assert_eq!(body["message"], "shortlink not found");
    assert_eq!(body["request_id"], "rid-404");
}

#[tokio::test]
async fn test_unmatched_path_is_404_with_error_shape() {
    let res = test_router()
        .oneshot(
            Request::builder()
                .uri("/no/such/path")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body_json(res).await;
    assert_eq!(body["code"], "NotFound");
    assert!(!body["request_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_method_not_allowed_carries_allow_header() {
    let res = test_router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = res
        .headers()
        .get(header::ALLOW)
        .expect("405 must carry Allow")
        .to_str()
        .unwrap();
    assert!(allow.contains("GET"), "Allow header was {:?}", allow);
}

#[tokio::test]
async fn test_panic_becomes_500_with_error_shape() {
    let res = test_router()
        .oneshot(Request::builder().uri("/panic").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(res).await;
    assert_eq!(body["code"], "Internal");
    assert_eq!(body["message"], "internal error");
    assert!(!body["request_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_matched_route_pattern_is_the_metrics_label() {
    let _ = test_router()
        .oneshot(Request::builder().uri("/xyz789").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let rendered = gee_api::metrics::render_metrics();
    assert!(
        rendered.contains(r#"route="/:code""#),
        "expected pattern label in metrics output"
    );
}
