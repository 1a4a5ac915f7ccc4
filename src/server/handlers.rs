//! HTTP request handlers for the preview API.
//!
//! # Endpoints
//!
//! - `GET /previews/scene/{scene_id}/{size}` - Scene preview
//! - `GET /previews/{kind}/{scene_id}/{item_id}/{size}` - Slide, page or node preview
//! - `POST /previews/batch` - Generate many previews, returns metadata
//! - `POST /previews/prefetch` - Warm the cache in the background
//! - `DELETE /previews/scene/{scene_id}` - Invalidate one scene preview
//! - `DELETE /previews/{kind}/{scene_id}/{item_id}` - Invalidate one item preview
//! - `DELETE /previews/scenes/{scene_id}` - Invalidate everything under a scene
//! - `DELETE /previews` - Clear the cache
//! - `GET /stats` - Cache and queue counters
//! - `GET /health` - Health check endpoint

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::DEFAULT_CACHE_MAX_AGE;
use crate::error::{PreviewError, RenderError};
use crate::preview::{
    fingerprint, CacheStats, PreviewOptions, PreviewService, PreviewTarget, Priority, Renderer,
    SizeTier, TargetKind, TargetKindTag,
};

/// Header reporting whether a preview was served from the cache.
pub const X_PREVIEW_CACHE_HIT: &str = "x-preview-cache-hit";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the preview service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<R> {
    /// The preview service handling every request
    pub service: PreviewService<R>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,
}

impl<R: Renderer + 'static> AppState<R> {
    /// Create application state with the default max-age.
    pub fn new(service: PreviewService<R>) -> Self {
        Self::with_cache_max_age(service, DEFAULT_CACHE_MAX_AGE)
    }

    /// Create application state with a custom max-age.
    pub fn with_cache_max_age(service: PreviewService<R>, cache_max_age: u32) -> Self {
        Self {
            service,
            cache_max_age,
        }
    }
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for scene previews.
///
/// Extracted from: `/previews/scene/{scene_id}/{size}`
#[derive(Debug, Deserialize)]
pub struct ScenePathParams {
    pub scene_id: String,

    /// Size tier with optional .jpg extension (e.g., "sm" or "sm.jpg")
    pub size: String,
}

/// Path parameters for slide, page and node previews.
///
/// Extracted from: `/previews/{kind}/{scene_id}/{item_id}/{size}`
#[derive(Debug, Deserialize)]
pub struct ItemPathParams {
    /// One of "slide", "page" or "node"
    pub kind: String,
    pub scene_id: String,
    pub item_id: String,

    /// Size tier with optional .jpg extension
    pub size: String,
}

/// Path parameters identifying one item target.
#[derive(Debug, Deserialize)]
pub struct ItemTargetParams {
    pub kind: String,
    pub scene_id: String,
    pub item_id: String,
}

/// Query parameters for preview requests.
#[derive(Debug, Default, Deserialize)]
pub struct PreviewQueryParams {
    /// Content revision of the target (default 0)
    #[serde(default)]
    pub rev: u64,

    /// JPEG quality override (1-100)
    #[serde(default)]
    pub quality: Option<u8>,

    /// "low", "normal" or "high"
    #[serde(default)]
    pub priority: Option<String>,

    /// Ignore any cached preview and render again
    #[serde(default)]
    pub fresh: bool,
}

impl PreviewQueryParams {
    fn options(&self) -> Result<PreviewOptions, HandlerError> {
        let mut options = PreviewOptions::new();

        if let Some(quality) = self.quality {
            if quality == 0 || quality > 100 {
                return Err(HandlerError::bad_request(
                    "invalid_quality",
                    format!("Invalid quality: {} (must be 1-100)", quality),
                ));
            }
            options = options.with_quality(quality);
        }
        if let Some(priority) = &self.priority {
            options = options.with_priority(parse_priority(priority)?);
        }
        if self.fresh {
            options = options.skip_cache();
        }
        Ok(options)
    }
}

/// Body of `POST /previews/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub size: String,
    pub targets: Vec<PreviewTarget>,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub fresh: bool,
}

/// Body of `POST /previews/prefetch`.
#[derive(Debug, Deserialize)]
pub struct PrefetchRequest {
    pub size: String,
    pub targets: Vec<PreviewTarget>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "invalid_size", "render_failed")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// One entry of a batch response.
#[derive(Debug, Serialize)]
pub struct BatchPreview {
    pub target: TargetKind,
    pub key: String,
    pub content_hash: String,
    pub bytes: usize,

    /// The entry is the placeholder because rendering failed
    pub failed: bool,
}

/// Response from the batch endpoint.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub previews: Vec<BatchPreview>,
    pub cached: usize,
    pub generated: usize,
    pub failed: usize,
}

/// Response from the prefetch endpoint.
#[derive(Debug, Serialize)]
pub struct PrefetchResponse {
    /// Targets handed to the background task
    pub accepted: usize,
}

/// Response from invalidation endpoints.
#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    /// Number of cache entries removed
    pub removed: usize,
}

/// Queue counters.
#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    /// Items waiting for a render slot
    pub ready: usize,

    /// Items still inside their debounce window
    pub debouncing: usize,

    /// Renders in progress
    pub in_flight: usize,
}

/// Response from the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStats,
    pub queue: QueueStatsResponse,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert PreviewError to HTTP response.
///
/// - `RenderingUnavailable` and `Cancelled` are 503 (try again later)
/// - other render failures are 502 (the render backend failed)
impl IntoResponse for PreviewError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            PreviewError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
            PreviewError::Render { source, .. } => match source {
                RenderError::RenderingUnavailable { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "rendering_unavailable")
                }
                RenderError::Timeout { .. } => (StatusCode::BAD_GATEWAY, "render_timeout"),
                RenderError::Transient { .. } | RenderError::Permanent { .. } => {
                    (StatusCode::BAD_GATEWAY, "render_failed")
                }
            },
        };

        error_response(status, error_type, self.to_string())
    }
}

/// Error type for preview handlers.
#[derive(Debug)]
pub enum HandlerError {
    /// Preview generation failed
    Preview(PreviewError),

    /// The request itself is malformed
    BadRequest {
        error_type: &'static str,
        message: String,
    },
}

impl HandlerError {
    fn bad_request(error_type: &'static str, message: impl Into<String>) -> Self {
        HandlerError::BadRequest {
            error_type,
            message: message.into(),
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Preview(err) => err.into_response(),
            HandlerError::BadRequest {
                error_type,
                message,
            } => error_response(StatusCode::BAD_REQUEST, error_type, message),
        }
    }
}

impl From<PreviewError> for HandlerError {
    fn from(err: PreviewError) -> Self {
        HandlerError::Preview(err)
    }
}

/// Build a JSON error response, logging it by severity.
fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status.is_client_error() {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

// =============================================================================
// Parsing Helpers
// =============================================================================

/// Parse a size tier, accepting an optional `.jpg` extension.
pub fn parse_size(segment: &str) -> Result<SizeTier, HandlerError> {
    let name = segment.strip_suffix(".jpg").unwrap_or(segment);
    SizeTier::from_str(name).map_err(|message| HandlerError::bad_request("invalid_size", message))
}

fn parse_priority(value: &str) -> Result<Priority, HandlerError> {
    Priority::from_str(value)
        .map_err(|message| HandlerError::bad_request("invalid_priority", message))
}

/// Parse a slide, page or node target from path segments.
fn parse_item_target(kind: &str, scene_id: &str, item_id: &str) -> Result<TargetKind, HandlerError> {
    let tag = TargetKindTag::from_str(kind)
        .map_err(|message| HandlerError::bad_request("invalid_kind", message))?;

    if tag == TargetKindTag::Scene {
        return Err(HandlerError::bad_request(
            "invalid_kind",
            "scene targets have no item id; use /previews/scene/{scene_id}",
        ));
    }

    TargetKind::from_parts(tag, scene_id, Some(item_id.to_string()))
        .ok_or_else(|| HandlerError::bad_request("invalid_kind", format!("invalid {} target", kind)))
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle scene preview requests.
///
/// # Endpoint
///
/// `GET /previews/scene/{scene_id}/{size}`
///
/// See [`item_preview_handler`] for query parameters and headers.
pub async fn scene_preview_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
    Path(params): Path<ScenePathParams>,
    Query(query): Query<PreviewQueryParams>,
) -> Result<Response, HandlerError> {
    let size = parse_size(&params.size)?;
    let target = PreviewTarget::scene(params.scene_id).with_revision(query.rev);
    serve_preview(&state, target, size, &query).await
}

/// Handle slide, page and node preview requests.
///
/// # Endpoint
///
/// `GET /previews/{kind}/{scene_id}/{item_id}/{size}`
///
/// # Query Parameters
///
/// - `rev`: content revision (default 0); a newer revision re-renders
/// - `quality`: JPEG quality override 1-100
/// - `priority`: `low`, `normal` (default) or `high`
/// - `fresh`: `true` to skip the cache
///
/// # Response
///
/// - `200 OK`: JPEG preview with `Content-Type: image/jpeg`
/// - `400 Bad Request`: Unknown kind, size, priority or quality
/// - `502 Bad Gateway`: Rendering failed
/// - `503 Service Unavailable`: Rendering unavailable or request cancelled
///
/// # Headers
///
/// - `Cache-Control: private, max-age={cache_max_age}`
/// - `ETag: "{content_hash}"`
/// - `X-Preview-Cache-Hit: true|false`
pub async fn item_preview_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
    Path(params): Path<ItemPathParams>,
    Query(query): Query<PreviewQueryParams>,
) -> Result<Response, HandlerError> {
    let size = parse_size(&params.size)?;
    let kind = parse_item_target(&params.kind, &params.scene_id, &params.item_id)?;
    let target = PreviewTarget::new(kind).with_revision(query.rev);
    serve_preview(&state, target, size, &query).await
}

async fn serve_preview<R: Renderer + 'static>(
    state: &AppState<R>,
    target: PreviewTarget,
    size: SizeTier,
    query: &PreviewQueryParams,
) -> Result<Response, HandlerError> {
    let options = query.options()?;
    let preview = state.service.get_preview(&target, size, options).await?;

    debug!(
        target = %target,
        size = %size,
        cache_hit = preview.cache_hit,
        bytes = preview.data.len(),
        "Served preview"
    );

    let headers = [
        (header::CONTENT_TYPE, "image/jpeg".to_string()),
        (
            header::CACHE_CONTROL,
            format!("private, max-age={}", state.cache_max_age),
        ),
        (header::ETAG, format!("\"{}\"", preview.content_hash)),
        (
            HeaderName::from_static(X_PREVIEW_CACHE_HIT),
            preview.cache_hit.to_string(),
        ),
    ];

    Ok((StatusCode::OK, headers, preview.data).into_response())
}

/// Handle batch requests.
///
/// # Endpoint
///
/// `POST /previews/batch`
///
/// ```json
/// {
///   "size": "sm",
///   "targets": [{"kind": "slide", "scene_id": "s1", "slide_id": "a", "revision": 2}],
///   "priority": "low"
/// }
/// ```
///
/// # Response
///
/// `200 OK` with one metadata entry per distinct target, in input order.
/// Failed targets are reported with `"failed": true` and the placeholder's
/// hash; the batch itself never fails.
pub async fn batch_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, HandlerError> {
    let size = parse_size(&request.size)?;

    let mut options = PreviewOptions::new();
    if let Some(priority) = &request.priority {
        options = options.with_priority(parse_priority(priority)?);
    }
    if request.fresh {
        options = options.skip_cache();
    }

    let report = state
        .service
        .generate_batch_report(&request.targets, size, options)
        .await;

    let mut seen = std::collections::HashSet::new();
    let previews = request
        .targets
        .iter()
        .filter(|target| seen.insert(&target.kind))
        .filter_map(|target| {
            let data = report.previews.get(&target.kind)?;
            Some(BatchPreview {
                target: target.kind.clone(),
                key: target.cache_key(size),
                content_hash: fingerprint(data),
                bytes: data.len(),
                failed: report.failed.contains(&target.kind),
            })
        })
        .collect();

    Ok(Json(BatchResponse {
        previews,
        cached: report.cached,
        generated: report.generated,
        failed: report.failed.len(),
    }))
}

/// Handle prefetch requests.
///
/// # Endpoint
///
/// `POST /previews/prefetch` with `{"size": "xs", "targets": [...]}`
///
/// # Response
///
/// `202 Accepted`; rendering continues in the background.
pub async fn prefetch_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
    Json(request): Json<PrefetchRequest>,
) -> Result<(StatusCode, Json<PrefetchResponse>), HandlerError> {
    let size = parse_size(&request.size)?;
    let accepted = request.targets.len();

    // Detached: the task outlives the request
    drop(state.service.prefetch(request.targets, size));

    Ok((StatusCode::ACCEPTED, Json(PrefetchResponse { accepted })))
}

/// Handle `DELETE /previews/scene/{scene_id}`: all tiers of the scene preview.
pub async fn invalidate_scene_preview_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
    Path(scene_id): Path<String>,
) -> Json<InvalidateResponse> {
    let removed = state
        .service
        .invalidate(&TargetKind::Scene { scene_id })
        .await;
    Json(InvalidateResponse { removed })
}

/// Handle `DELETE /previews/{kind}/{scene_id}/{item_id}`: all tiers of one item.
pub async fn invalidate_item_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
    Path(params): Path<ItemTargetParams>,
) -> Result<Json<InvalidateResponse>, HandlerError> {
    let target = parse_item_target(&params.kind, &params.scene_id, &params.item_id)?;
    let removed = state.service.invalidate(&target).await;
    Ok(Json(InvalidateResponse { removed }))
}

/// Handle `DELETE /previews/scenes/{scene_id}`: everything under a scene.
pub async fn invalidate_scene_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
    Path(scene_id): Path<String>,
) -> Json<InvalidateResponse> {
    let removed = state.service.invalidate_scene(&scene_id).await;
    Json(InvalidateResponse { removed })
}

/// Handle `DELETE /previews`: empty the cache.
pub async fn clear_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
) -> Json<InvalidateResponse> {
    let removed = state.service.clear_cache().await;
    Json(InvalidateResponse { removed })
}

/// Handle `GET /stats`.
pub async fn stats_handler<R: Renderer + 'static>(
    State(state): State<AppState<R>>,
) -> Json<StatsResponse> {
    let queue = state.service.queue();
    Json(StatsResponse {
        cache: state.service.cache_stats().await,
        queue: QueueStatsResponse {
            ready: queue.queue_size(),
            debouncing: queue.debouncing(),
            in_flight: queue.concurrent(),
        },
    })
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
