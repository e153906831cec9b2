//! API integration tests.
//!
//! Tests verify:
//! - Image responses with PNG bodies and tier headers
//! - Query validation errors as JSON
//! - Only allowed URI schemes reach the engine
//! - Load failures mapped to HTTP status codes
//! - Health and cache statistics endpoints

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use pictor::{create_router, ImageEngine, RouterConfig};

use super::test_utils::{corrupt_png, png_bytes, MockHttpStack};

const URL: &str = "https://images.test/photo.png";
const ENCODED_URL: &str = "https%3A%2F%2Fimages.test%2Fphoto.png";

fn router_with(stack: &MockHttpStack, config: RouterConfig) -> Router {
    let engine = ImageEngine::builder()
        .http_stack(Arc::new(stack.clone()))
        .build();
    create_router(engine, config)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header<'a>(response: &'a axum::response::Response, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

// =============================================================================
// Image Endpoint
// =============================================================================

#[tokio::test]
async fn test_image_success() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(64, 32));
    let router = router_with(&stack, RouterConfig::new().with_cache_max_age(600));

    let response = router
        .oneshot(get(&format!("/image?uri={ENCODED_URL}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "image/png");
    assert_eq!(header(&response, "cache-control"), "public, max-age=600");
    assert_eq!(header(&response, "x-image-data-from"), "NETWORK");
    assert_eq!(header(&response, "x-image-width"), "64");
    assert_eq!(header(&response, "x-image-height"), "32");

    let png = body_bytes(response).await;
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 32));
}

#[tokio::test]
async fn test_image_resize() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(200, 100));
    let router = router_with(&stack, RouterConfig::new());

    let response = router
        .oneshot(get(&format!(
            "/image?uri={ENCODED_URL}&width=50&height=40&scale=start_crop"
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-image-width"), "50");
    assert_eq!(header(&response, "x-image-height"), "40");
}

#[tokio::test]
async fn test_image_second_request_hits_memory() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(16, 16));
    let router = router_with(&stack, RouterConfig::new());
    let uri = format!("/image?uri={ENCODED_URL}");

    let first = router.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(header(&first, "x-image-data-from"), "NETWORK");

    let second = router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-image-data-from"), "MEMORY_CACHE");
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_image_refresh_refetches() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(16, 16));
    let router = router_with(&stack, RouterConfig::new());

    let first = router
        .clone()
        .oneshot(get(&format!("/image?uri={ENCODED_URL}")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let refreshed = router
        .oneshot(get(&format!("/image?uri={ENCODED_URL}&refresh=true")))
        .await
        .unwrap();
    assert_eq!(refreshed.status(), StatusCode::OK);
    assert_eq!(header(&refreshed, "x-image-data-from"), "NETWORK");
    assert_eq!(stack.request_count(), 2);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_missing_uri() {
    let router = router_with(&MockHttpStack::new(), RouterConfig::new());

    let response = router.oneshot(get("/image")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_request");
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn test_partial_size_rejected() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(8, 8));
    let router = router_with(&stack, RouterConfig::new());

    let response = router
        .oneshot(get(&format!("/image?uri={ENCODED_URL}&width=100")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
    assert_eq!(stack.request_count(), 0);
}

#[tokio::test]
async fn test_unknown_scale_rejected() {
    let router = router_with(&MockHttpStack::new(), RouterConfig::new());

    let response = router
        .oneshot(get(&format!(
            "/image?uri={ENCODED_URL}&width=10&height=10&scale=stretch"
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_source_not_found() {
    let router = router_with(&MockHttpStack::new(), RouterConfig::new());

    let response = router
        .oneshot(get(&format!("/image?uri={ENCODED_URL}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "source_not_found");
    assert!(json["message"].as_str().unwrap().contains(URL));
}

#[tokio::test]
async fn test_origin_failures() {
    let stack = MockHttpStack::new();
    stack.set_route(URL, StatusCode::BAD_GATEWAY, Vec::new(), None);
    stack.set_route(
        "https://images.test/busy.png",
        StatusCode::TOO_MANY_REQUESTS,
        Vec::new(),
        None,
    );
    let router = router_with(&stack, RouterConfig::new());

    let response = router
        .clone()
        .oneshot(get(&format!("/image?uri={ENCODED_URL}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"], "server_error");

    let response = router
        .oneshot(get("/image?uri=https%3A%2F%2Fimages.test%2Fbusy.png"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_undecodable_image() {
    let stack = MockHttpStack::new().with_image(URL, corrupt_png());
    let router = router_with(&stack, RouterConfig::new());

    let response = router
        .oneshot(get(&format!("/image?uri={ENCODED_URL}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "decode_malformed");
}

#[tokio::test]
async fn test_local_paths_rejected_by_default() {
    let router = router_with(&MockHttpStack::new(), RouterConfig::new());

    for uri in ["%2Fetc%2Fpasswd", "file%3A%2F%2F%2Fetc%2Fpasswd", "FILE%3A%2F%2F%2Fetc%2Fpasswd"] {
        let response = router
            .clone()
            .oneshot(get(&format!("/image?uri={uri}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert!(json["message"].as_str().unwrap().contains("allowed"));
    }
}

#[tokio::test]
async fn test_unlisted_scheme_rejected() {
    let router = router_with(&MockHttpStack::new(), RouterConfig::new());

    let response = router
        .oneshot(get("/image?uri=gopher%3A%2F%2Fimages.test%2Fa.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_allowed_scheme_without_fetcher() {
    let config = RouterConfig::new().with_allowed_schemes(vec!["gopher".to_string()]);
    let router = router_with(&MockHttpStack::new(), config);

    let response = router
        .oneshot(get("/image?uri=gopher%3A%2F%2Fimages.test%2Fa.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(response).await["error"], "no_matching_handler");
}

#[tokio::test]
async fn test_file_scheme_served_when_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.png");
    std::fs::write(&path, png_bytes(12, 6)).unwrap();
    let uri = url::Url::from_file_path(&path).unwrap().to_string();
    let encoded: String = url::form_urlencoded::byte_serialize(uri.as_bytes()).collect();

    let config = RouterConfig::new().with_allowed_schemes(vec!["file".to_string()]);
    let router = router_with(&MockHttpStack::new(), config);

    let response = router
        .oneshot(get(&format!("/image?uri={encoded}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-image-data-from"), "LOCAL");
    assert_eq!(header(&response, "x-image-width"), "12");
}

#[tokio::test]
async fn test_image_rotate() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(64, 32));
    let router = router_with(&stack, RouterConfig::new());

    let response = router
        .oneshot(get(&format!("/image?uri={ENCODED_URL}&rotate=90")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-image-width"), "32");
    assert_eq!(header(&response, "x-image-height"), "64");
}

// =============================================================================
// Health and Stats
// =============================================================================

#[tokio::test]
async fn test_health() {
    let router = router_with(&MockHttpStack::new(), RouterConfig::new());

    let response = router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_cache_stats_reflect_loads() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(10, 10));
    let router = router_with(&stack, RouterConfig::new());

    let response = router
        .clone()
        .oneshot(get(&format!("/image?uri={ENCODED_URL}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    let response = router.oneshot(get("/cache/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["memory"]["entries"], 1);
    assert!(json["download"].is_null());
    assert!(json["result"].is_null());
}

#[tokio::test]
async fn test_cors_preflight() {
    let router = router_with(
        &MockHttpStack::new(),
        RouterConfig::new().with_cors_any_origin(),
    );

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/image")
        .header("origin", "https://gallery.example")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(header(&response, "access-control-allow-origin"), "*");
}
