//! Configuration management for Scene Preview.
//!
//! Settings come from command-line arguments (clap) with environment
//! variable fallbacks using the `PREVIEW_` prefix. [`Config::pipeline`] turns
//! the parsed settings into a [`PipelineConfig`], which wires the library
//! components without any CLI dependency.
//!
//! # Example
//!
//! ```ignore
//! use scene_preview::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//!
//! let service = config.pipeline().build(renderer);
//! ```
//!
//! # Environment Variables
//!
//! - `PREVIEW_HOST` - Server bind address (default: 0.0.0.0)
//! - `PREVIEW_PORT` - Server port (default: 3000)
//! - `PREVIEW_CACHE_ENTRIES` - Max previews to cache (default: 500)
//! - `PREVIEW_MAX_CONCURRENT` - Renders in flight (default: 2)
//! - `PREVIEW_DEBOUNCE_MS` - Debounce window per target (default: 300)
//! - `PREVIEW_MAX_ATTEMPTS` - Attempts per render, first included (default: 3)
//! - `PREVIEW_RENDER_TIMEOUT_MS` - Timeout per render attempt (default: 10000)
//! - `PREVIEW_BATCH_CHUNK_SIZE` - Parallel renders per batch chunk (default: 4)
//! - `PREVIEW_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 300)
//! - `PREVIEW_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::preview::{
    EventBus, PreviewCache, PreviewQueue, PreviewService, QueueConfig, Renderer, ServiceConfig,
    DEFAULT_BATCH_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT,
    DEFAULT_PREVIEW_CACHE_CAPACITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Default render timeout in milliseconds.
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;

/// Default HTTP cache max-age in seconds (5 minutes).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 300;

/// Upper bound for the attempt ceiling.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Scene Preview - thumbnail server for scenes, slides, pages and nodes.
///
/// Renders small JPEG previews on demand, coalescing bursts of requests and
/// keeping recently used previews in memory.
#[derive(Parser, Debug, Clone)]
#[command(name = "scene-preview")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PREVIEW_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PREVIEW_PORT")]
    pub port: u16,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of encoded previews kept in memory.
    #[arg(long, default_value_t = DEFAULT_PREVIEW_CACHE_CAPACITY, env = "PREVIEW_CACHE_ENTRIES")]
    pub cache_entries: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "PREVIEW_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Queue Configuration
    // =========================================================================
    /// Maximum number of renders in flight at once.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT, env = "PREVIEW_MAX_CONCURRENT")]
    pub max_concurrent: usize,

    /// Quiet period before a requested preview is rendered.
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE_MS, env = "PREVIEW_DEBOUNCE_MS")]
    pub debounce_ms: u64,

    /// Render attempts per preview, the first one included.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "PREVIEW_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Timeout for a single render attempt.
    #[arg(long, default_value_t = DEFAULT_RENDER_TIMEOUT_MS, env = "PREVIEW_RENDER_TIMEOUT_MS")]
    pub render_timeout_ms: u64,

    /// Previews rendered in parallel per batch chunk.
    #[arg(long, default_value_t = DEFAULT_BATCH_CHUNK_SIZE, env = "PREVIEW_BATCH_CHUNK_SIZE")]
    pub batch_chunk_size: usize,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "PREVIEW_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline().validate()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Library-level settings derived from the CLI.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            cache_entries: self.cache_entries,
            queue: QueueConfig {
                debounce: Duration::from_millis(self.debounce_ms),
                max_concurrent: self.max_concurrent,
                max_attempts: self.max_attempts,
                render_timeout: Duration::from_millis(self.render_timeout_ms),
            },
            service: ServiceConfig {
                batch_chunk_size: self.batch_chunk_size,
            },
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Settings for one cache, queue and service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub cache_entries: usize,
    pub queue: QueueConfig,
    pub service: ServiceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_entries: DEFAULT_PREVIEW_CACHE_CAPACITY,
            queue: QueueConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check that every setting is usable.
    ///
    /// The debounce window may be zero; everything else must be positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_entries == 0 {
            return Err(ConfigError::Zero {
                field: "cache_entries",
            });
        }
        if self.queue.max_concurrent == 0 {
            return Err(ConfigError::Zero {
                field: "max_concurrent",
            });
        }
        if self.queue.max_attempts == 0 || self.queue.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::OutOfRange {
                field: "max_attempts",
                min: 1,
                max: MAX_ATTEMPTS_LIMIT as u64,
                value: self.queue.max_attempts as u64,
            });
        }
        if self.queue.render_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "render_timeout_ms",
            });
        }
        if self.service.batch_chunk_size == 0 {
            return Err(ConfigError::Zero {
                field: "batch_chunk_size",
            });
        }
        Ok(())
    }

    /// Wire a service around `renderer`, sharing one event bus between the
    /// queue and the service.
    pub fn build<R: Renderer + 'static>(&self, renderer: R) -> PreviewService<R> {
        let events = EventBus::new();
        let queue = PreviewQueue::new(renderer, self.queue.clone(), events.clone());
        let cache = PreviewCache::with_capacity(self.cache_entries);
        PreviewService::new(cache, queue, events, self.service.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
