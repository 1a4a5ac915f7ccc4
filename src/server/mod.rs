//! HTTP server layer for Scene Preview.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │      GET /previews/{kind}/{scene_id}/{item_id}/{size}.jpg       │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (requests, error → JSON) │  │ (router, CORS, tracing)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └────────────────────────────────┬────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                           PreviewService
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    batch_handler, clear_handler, health_handler, invalidate_item_handler,
    invalidate_scene_handler, invalidate_scene_preview_handler, item_preview_handler,
    parse_size, prefetch_handler, scene_preview_handler, stats_handler, AppState, BatchPreview,
    BatchRequest, BatchResponse, ErrorResponse, HandlerError, HealthResponse, InvalidateResponse,
    ItemPathParams, ItemTargetParams, PrefetchRequest, PrefetchResponse, PreviewQueryParams,
    QueueStatsResponse, ScenePathParams, StatsResponse, X_PREVIEW_CACHE_HIT,
};
pub use routes::{create_default_router, create_router, RouterConfig};
