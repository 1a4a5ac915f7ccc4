//! # Scene Preview
//!
//! Thumbnail generation and caching for the navigation aids of an authoring
//! UI: tree views, filmstrips and carousels.
//!
//! Given a target (a scene, or a slide, page or node inside one) and a size
//! tier, the pipeline produces a small JPEG quickly, reuses cached images
//! while they are fresh, and keeps memory bounded.
//!
//! ## Features
//!
//! - **Bounded LRU cache**: entry-count limit with hit, miss and eviction counters
//! - **Render queue**: per-target debouncing, priorities, bounded concurrency, retries
//! - **Freshness**: caller-supplied revisions make stale previews re-render
//! - **Batch and prefetch**: chunked fan-out with per-item failure isolation
//! - **Event stream**: typed events for cache, batch and render progress
//! - **HTTP front-end**: axum routes serving previews and cache control
//!
//! ## Architecture
//!
//! - [`preview`] - Cache, queue, renderer, events and the service façade
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and pipeline configuration
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use scene_preview::{PipelineConfig, PreviewOptions, PreviewTarget, RasterRenderer, SizeTier};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = PipelineConfig::default().build(RasterRenderer::new());
//!
//!     let target = PreviewTarget::slide("deck-1", "intro").with_revision(3);
//!     let jpeg = service
//!         .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
//!         .await
//!         .unwrap();
//!
//!     println!("{} bytes", jpeg.len());
//! }
//! ```

pub mod config;
pub mod error;
pub mod preview;
pub mod server;

// Re-export commonly used types
pub use config::{Config, PipelineConfig};
pub use error::{ConfigError, PreviewError, RenderError};
pub use preview::{
    fingerprint, render_placeholder, scene_pattern, wildcard_match, BatchReport, CacheEntry,
    CacheStats, EventBus, EventKind, EventSubscription, FreshLookup, PreviewCache, PreviewEvent,
    PreviewOptions, PreviewQueue, PreviewResponse, PreviewService, PreviewTarget, Priority,
    QueueConfig, QueueItem, RasterRenderer, RenderRequest, RenderedImage, RenderedPreview,
    Renderer, ServiceConfig, SizeTier, SurfaceDrawer, SwatchDrawer, TargetKind, TargetKindTag,
};
pub use server::{
    create_default_router, create_router, health_handler, AppState, ErrorResponse,
    HealthResponse, RouterConfig,
};
