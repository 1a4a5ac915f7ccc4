//! Scene Preview - thumbnail server for scenes, slides, pages and nodes.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scene_preview::{
    config::Config,
    preview::{PreviewService, RasterRenderer, SwatchDrawer, TargetKindTag},
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Scene Preview v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Cache: {} previews", config.cache_entries);
    info!(
        "  Queue: {} concurrent, {}ms debounce, {} attempts, {}ms timeout",
        config.max_concurrent, config.debounce_ms, config.max_attempts, config.render_timeout_ms
    );
    info!("  Batch chunk size: {}", config.batch_chunk_size);

    let service = config.pipeline().build(build_renderer());
    let router = create_router(service.clone(), build_router_config(&config));

    // Bind and serve
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/stats", addr);
    info!("    curl -o s1.jpg http://{}/previews/scene/s1/sm.jpg", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(service))
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Software renderer with the swatch drawer for every target kind.
fn build_renderer() -> RasterRenderer {
    [
        TargetKindTag::Scene,
        TargetKindTag::Slide,
        TargetKindTag::Page,
        TargetKindTag::Node,
    ]
    .into_iter()
    .fold(RasterRenderer::new(), |renderer, tag| {
        renderer.with_drawer(tag, SwatchDrawer)
    })
}

/// Wait for Ctrl-C, then drop queued work.
async fn shutdown_signal(service: PreviewService<RasterRenderer>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    service.shutdown();
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "scene_preview=debug,tower_http=debug"
    } else {
        "scene_preview=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the CLI configuration.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}
