//! Preview pipeline.
//!
//! Turns target references into small JPEG thumbnails, reusing cached images
//! whenever they are still fresh.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Callers / HTTP Handlers         │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             PreviewService              │──► EventBus
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ PreviewCache │  │  PreviewQueue   │  │
//! │  │ (LRU, fresh- │  │ (debounce, pri- │  │
//! │  │  ness check) │  │  ority, retry)  │  │
//! │  └──────────────┘  └────────┬────────┘  │
//! └─────────────────────────────┼───────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────┐
//! │      Renderer (RasterRenderer + drawers)│
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`PreviewService`]: entry point; cache lookup, batch, prefetch, invalidation
//! - [`PreviewCache`]: entry-bounded LRU of encoded previews with hit/miss counters
//! - [`PreviewQueue`]: coalesces and schedules render work
//! - [`Renderer`]: the render capability; [`RasterRenderer`] is the software one
//! - [`EventBus`]: typed stream of [`PreviewEvent`]s
//! - [`PreviewTarget`] / [`SizeTier`]: what to preview and how big

mod cache;
mod events;
mod queue;
mod render;
mod service;
mod target;

pub use cache::{
    wildcard_match, CacheEntry, CacheStats, FreshLookup, PreviewCache,
    DEFAULT_PREVIEW_CACHE_CAPACITY,
};
pub use events::{EventBus, EventKind, EventSubscription, PreviewEvent, DEFAULT_EVENT_CAPACITY};
pub use queue::{
    PreviewQueue, QueueConfig, QueueItem, RenderedPreview, DEFAULT_DEBOUNCE, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_CONCURRENT, DEFAULT_RENDER_TIMEOUT,
};
pub use render::{
    fingerprint, render_placeholder, RasterRenderer, RenderRequest, RenderedImage, Renderer,
    SurfaceDrawer, SwatchDrawer, MAX_SURFACE_DIMENSION,
};
pub use service::{
    BatchReport, PreviewResponse, PreviewService, ServiceConfig, DEFAULT_BATCH_CHUNK_SIZE,
};
pub use target::{
    scene_pattern, PreviewOptions, PreviewTarget, Priority, SizeTier, TargetKind, TargetKindTag,
    KEY_PREFIX,
};
