//! API integration tests for preview serving and cache control.
//!
//! Tests verify:
//! - Preview retrieval for scenes and items
//! - Cache headers and the cache-hit marker
//! - Error cases (unknown size or kind, failed or unavailable rendering)
//! - Batch, prefetch, invalidation and stats endpoints

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

use scene_preview::preview::{PreviewTarget, SizeTier, TargetKindTag};
use scene_preview::RenderError;

use super::test_utils::{full_renderer, is_valid_jpeg, swatch_renderer, test_router, FaultyRenderer};

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Value) -> axum::response::Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn delete(router: &Router, uri: &str) -> axum::response::Response {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (router, _) = test_router(full_renderer());

    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// Preview Retrieval
// =============================================================================

#[tokio::test]
async fn test_scene_preview_success() {
    let (router, _) = test_router(full_renderer());

    let response = get(&router, "/previews/scene/s1/sm.jpg").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "private, max-age=300"
    );
    assert!(response.headers().contains_key("etag"));
    assert_eq!(response.headers().get("x-preview-cache-hit").unwrap(), "false");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(is_valid_jpeg(&body), "Response should be a valid JPEG");
}

#[tokio::test]
async fn test_second_request_is_cache_hit() {
    let (router, _) = test_router(full_renderer());

    let first = get(&router, "/previews/scene/s1/xs").await;
    let first_etag = first.headers().get("etag").unwrap().clone();
    let second = get(&router, "/previews/scene/s1/xs").await;

    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers().get("x-preview-cache-hit").unwrap(), "true");
    assert_eq!(second.headers().get("etag").unwrap(), &first_etag);
}

#[tokio::test]
async fn test_fresh_query_bypasses_cache() {
    let (router, _) = test_router(full_renderer());

    get(&router, "/previews/scene/s1/xs").await;
    let response = get(&router, "/previews/scene/s1/xs?fresh=true").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-preview-cache-hit").unwrap(), "false");
}

#[tokio::test]
async fn test_item_preview_with_revision() {
    let (router, service) = test_router(full_renderer());

    let response = get(&router, "/previews/slide/deck/intro/md.jpg?rev=4").await;
    assert_eq!(response.status(), StatusCode::OK);

    let target = PreviewTarget::slide("deck", "intro").with_revision(4);
    assert!(service.get_cached(&target, SizeTier::Md).await.is_some());

    // A different revision is a miss
    let response = get(&router, "/previews/slide/deck/intro/md.jpg?rev=5").await;
    assert_eq!(response.headers().get("x-preview-cache-hit").unwrap(), "false");
}

#[tokio::test]
async fn test_quality_changes_output() {
    let (router, _) = test_router(full_renderer());

    let low = get(&router, "/previews/page/doc/p1/md?quality=20&fresh=true").await;
    let high = get(&router, "/previews/page/doc/p1/md?quality=95&fresh=true").await;
    assert_eq!(low.status(), StatusCode::OK);
    assert_eq!(high.status(), StatusCode::OK);

    let low = low.into_body().collect().await.unwrap().to_bytes();
    let high = high.into_body().collect().await.unwrap().to_bytes();
    assert_ne!(low, high);
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_invalid_size() {
    let (router, _) = test_router(full_renderer());

    let response = get(&router, "/previews/scene/s1/xl.jpg").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid_size");
}

#[tokio::test]
async fn test_invalid_kind() {
    let (router, _) = test_router(full_renderer());

    let response = get(&router, "/previews/widget/s1/w1/sm").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid_kind");
}

#[tokio::test]
async fn test_invalid_priority() {
    let (router, _) = test_router(full_renderer());

    let response = get(&router, "/previews/scene/s1/sm?priority=urgent").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_priority");
}

#[tokio::test]
async fn test_permanent_failure_is_bad_gateway() {
    let renderer = FaultyRenderer::new(full_renderer())
        .with_fault("broken", RenderError::permanent("corrupt node"));
    let (router, _) = test_router(renderer);

    let response = get(&router, "/previews/node/g/broken/sm").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"], "render_failed");
}

#[tokio::test]
async fn test_unavailable_rendering_is_service_unavailable() {
    let renderer = FaultyRenderer::new(swatch_renderer(&[TargetKindTag::Scene]))
        .with_fault("s1", RenderError::unavailable("no surface"));
    let (router, _) = test_router(renderer);

    let response = get(&router, "/previews/scene/s1/sm").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"], "rendering_unavailable");
}

// =============================================================================
// Batch and Prefetch
// =============================================================================

#[tokio::test]
async fn test_batch_endpoint() {
    let renderer = FaultyRenderer::new(full_renderer())
        .with_fault("bad", RenderError::permanent("nope"));
    let (router, _) = test_router(renderer);

    get(&router, "/previews/slide/s1/a/sm").await;

    let response = send_json(
        &router,
        "POST",
        "/previews/batch",
        json!({
            "size": "sm",
            "targets": [
                {"kind": "slide", "scene_id": "s1", "slide_id": "a"},
                {"kind": "slide", "scene_id": "s1", "slide_id": "bad"},
                {"kind": "page", "scene_id": "doc", "page_id": "p1", "revision": 2},
                {"kind": "slide", "scene_id": "s1", "slide_id": "a"}
            ]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["cached"], 1);
    assert_eq!(body["generated"], 1);
    assert_eq!(body["failed"], 1);

    let previews = body["previews"].as_array().unwrap();
    assert_eq!(previews.len(), 3);
    assert_eq!(previews[0]["key"], "preview:s1:slide:a:sm");
    assert_eq!(previews[1]["failed"], true);
    assert_eq!(previews[2]["target"]["kind"], "page");
}

#[tokio::test]
async fn test_batch_invalid_size() {
    let (router, _) = test_router(full_renderer());

    let response = send_json(
        &router,
        "POST",
        "/previews/batch",
        json!({"size": "huge", "targets": []}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_prefetch_accepted_and_warms_cache() {
    let (router, service) = test_router(full_renderer());

    let response = send_json(
        &router,
        "POST",
        "/previews/prefetch",
        json!({
            "size": "xs",
            "targets": [
                {"kind": "scene", "scene_id": "s1"},
                {"kind": "node", "scene_id": "g", "node_id": "n1"}
            ]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["accepted"], 2);

    let target = PreviewTarget::node("g", "n1");
    let mut warmed = false;
    for _ in 0..100 {
        if service.get_cached(&target, SizeTier::Xs).await.is_some() {
            warmed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(warmed, "prefetch should populate the cache");
}

// =============================================================================
// Invalidation and Stats
// =============================================================================

#[tokio::test]
async fn test_invalidation_endpoints() {
    let (router, _) = test_router(full_renderer());

    for uri in [
        "/previews/scene/s1/xs",
        "/previews/scene/s1/sm",
        "/previews/slide/s1/a/sm",
        "/previews/slide/s1/b/sm",
        "/previews/node/s2/n1/sm",
    ] {
        assert_eq!(get(&router, uri).await.status(), StatusCode::OK);
    }

    let response = delete(&router, "/previews/scene/s1").await;
    assert_eq!(json_body(response).await["removed"], 2);

    let response = delete(&router, "/previews/slide/s1/a").await;
    assert_eq!(json_body(response).await["removed"], 1);

    let response = delete(&router, "/previews/scenes/s1").await;
    assert_eq!(json_body(response).await["removed"], 1);

    let response = delete(&router, "/previews").await;
    assert_eq!(json_body(response).await["removed"], 1);
}

#[tokio::test]
async fn test_stats() {
    let (router, _) = test_router(full_renderer());

    get(&router, "/previews/scene/s1/sm").await;
    get(&router, "/previews/scene/s1/sm").await;

    let response = get(&router, "/stats").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["cache"]["size"], 1);
    assert_eq!(body["cache"]["hit_count"], 1);
    assert_eq!(body["cache"]["miss_count"], 1);
    assert_eq!(body["cache"]["hit_rate"], 0.5);
    assert_eq!(body["queue"]["ready"], 0);
    assert_eq!(body["queue"]["in_flight"], 0);
}
