//! Router configuration for Scene Preview.
//!
//! This module defines the HTTP routes and applies CORS and tracing middleware.
//!
//! # Route Structure
//!
//! ```text
//! /health                                          GET     - Health check
//! /stats                                           GET     - Cache and queue counters
//! /previews                                        DELETE  - Clear the cache
//! /previews/batch                                  POST    - Batch generation
//! /previews/prefetch                               POST    - Background warming
//! /previews/scenes/{scene_id}                      DELETE  - Invalidate a whole scene
//! /previews/scene/{scene_id}                       DELETE  - Invalidate the scene preview
//! /previews/scene/{scene_id}/{size}                GET     - Scene preview
//! /previews/{kind}/{scene_id}/{item_id}            DELETE  - Invalidate an item preview
//! /previews/{kind}/{scene_id}/{item_id}/{size}     GET     - Slide, page or node preview
//! ```
//!
//! # Example
//!
//! ```ignore
//! use scene_preview::config::PipelineConfig;
//! use scene_preview::server::{create_router, RouterConfig};
//!
//! let service = PipelineConfig::default().build(renderer);
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://editor.example.com".to_string()]);
//!
//! let router = create_router(service, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use http::header::{CONTENT_TYPE, IF_NONE_MATCH};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    batch_handler, clear_handler, health_handler, invalidate_item_handler,
    invalidate_scene_handler, invalidate_scene_preview_handler, item_preview_handler,
    prefetch_handler, scene_preview_handler, stats_handler, AppState,
};
use crate::config::DEFAULT_CACHE_MAX_AGE;
use crate::preview::{PreviewService, Renderer};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Cache max-age is 5 minutes (300 seconds)
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router around a preview service.
pub fn create_router<R>(service: PreviewService<R>, config: RouterConfig) -> Router
where
    R: Renderer + 'static,
{
    let app_state = AppState::with_cache_max_age(service, config.cache_max_age);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler::<R>))
        .route("/previews", delete(clear_handler::<R>))
        .route("/previews/batch", post(batch_handler::<R>))
        .route("/previews/prefetch", post(prefetch_handler::<R>))
        .route(
            "/previews/scenes/{scene_id}",
            delete(invalidate_scene_handler::<R>),
        )
        .route(
            "/previews/scene/{scene_id}",
            delete(invalidate_scene_preview_handler::<R>),
        )
        .route(
            "/previews/scene/{scene_id}/{size}",
            get(scene_preview_handler::<R>),
        )
        .route(
            "/previews/{kind}/{scene_id}/{item_id}",
            delete(invalidate_item_handler::<R>),
        )
        .route(
            "/previews/{kind}/{scene_id}/{item_id}/{size}",
            get(item_preview_handler::<R>),
        )
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Create a router with default settings.
pub fn create_default_router<R>(service: PreviewService<R>) -> Router
where
    R: Renderer + 'static,
{
    create_router(service, RouterConfig::new())
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, IF_NONE_MATCH])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        // No origins allowed
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
