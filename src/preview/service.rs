//! Preview service: the public façade over cache and queue.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          PreviewService                            │
//! │  ┌────────────────────────────────────────────────────────────┐   │
//! │  │ generate_preview()                                         │   │
//! │  │  1. Compute key + fingerprint   3. Miss: enqueue           │   │
//! │  │  2. Fresh hit? return           4. Store entry & return    │   │
//! │  └────────────────────────────────────────────────────────────┘   │
//! │        │                       │                       │           │
//! │        ▼                       ▼                       ▼           │
//! │  ┌──────────────┐     ┌──────────────────┐     ┌──────────────┐   │
//! │  │ PreviewCache │     │ PreviewQueue<R>  │────►│   Renderer   │   │
//! │  └──────────────┘     └──────────────────┘     └──────────────┘   │
//! │                                │                                   │
//! │                                ▼                                   │
//! │                          ┌──────────┐                              │
//! │                          │ EventBus │──► subscribers               │
//! │                          └──────────┘                              │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Freshness
//!
//! A cached entry remembers the fingerprint of the [`PreviewTarget`] it was
//! rendered from, identity and `revision` included. A lookup whose fingerprint
//! differs treats the entry as stale. Callers that bump the revision on every
//! edit get staleness detection for free; callers that leave it at 0 must call
//! [`PreviewService::invalidate`] after an edit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::PreviewError;

use super::cache::{CacheEntry, CacheStats, FreshLookup, PreviewCache};
use super::events::{EventBus, EventKind, EventSubscription, PreviewEvent};
use super::queue::{PreviewQueue, QueueItem, RenderedPreview};
use super::render::{render_placeholder, RenderedImage, Renderer};
use super::target::{scene_pattern, PreviewOptions, PreviewTarget, Priority, SizeTier, TargetKind};

/// Default number of batch items generated in parallel.
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 4;

/// Service-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Targets generated per parallel batch chunk
    pub batch_chunk_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// A preview together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewResponse {
    /// Encoded JPEG bytes
    pub data: Bytes,

    /// Fingerprint of `data`
    pub content_hash: String,

    /// Whether the preview came from the cache
    pub cache_hit: bool,
}

impl PreviewResponse {
    fn cached(entry: CacheEntry) -> Self {
        Self {
            data: entry.data,
            content_hash: entry.content_hash,
            cache_hit: true,
        }
    }

    fn generated(image: RenderedImage) -> Self {
        Self {
            data: image.data,
            content_hash: image.content_hash,
            cache_hit: false,
        }
    }
}

/// Outcome of a batch request.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One preview per distinct input target
    pub previews: HashMap<TargetKind, Bytes>,

    /// Entries served from the cache
    pub cached: usize,

    /// Entries rendered for this batch
    pub generated: usize,

    /// Targets that failed and were given the placeholder
    pub failed: Vec<TargetKind>,
}

// =============================================================================
// Preview Service
// =============================================================================

struct ServiceInner<R> {
    cache: PreviewCache,
    queue: PreviewQueue<R>,
    events: EventBus,
    config: ServiceConfig,
}

/// Cache-first preview generation with batch, prefetch and invalidation.
///
/// Cloning is cheap and yields a handle to the same service.
///
/// # Example
///
/// ```ignore
/// let events = EventBus::new();
/// let queue = PreviewQueue::new(renderer, QueueConfig::default(), events.clone());
/// let service = PreviewService::new(PreviewCache::new(), queue, events, ServiceConfig::default());
///
/// let target = PreviewTarget::slide("s1", "intro").with_revision(7);
/// let jpeg = service.generate_preview(&target, SizeTier::Sm, PreviewOptions::new()).await?;
/// ```
pub struct PreviewService<R> {
    inner: Arc<ServiceInner<R>>,
}

impl<R> Clone for PreviewService<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Renderer + 'static> PreviewService<R> {
    /// Wire a service from its parts.
    ///
    /// `events` should be the bus the queue publishes on, so subscribers see
    /// one stream.
    pub fn new(
        cache: PreviewCache,
        queue: PreviewQueue<R>,
        events: EventBus,
        config: ServiceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                cache,
                queue,
                events,
                config,
            }),
        }
    }

    pub fn cache(&self) -> &PreviewCache {
        &self.inner.cache
    }

    pub fn queue(&self) -> &PreviewQueue<R> {
        &self.inner.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Get a preview, rendering it on a miss.
    ///
    /// See [`get_preview`](Self::get_preview) for the full response.
    pub async fn generate_preview(
        &self,
        target: &PreviewTarget,
        size: SizeTier,
        options: PreviewOptions,
    ) -> Result<Bytes, PreviewError> {
        self.get_preview(target, size, options)
            .await
            .map(|response| response.data)
    }

    /// Get a preview with its hash and cache status.
    ///
    /// A fresh cache hit returns without touching the queue, unless
    /// `options.skip_cache` is set. Otherwise the target is enqueued and the
    /// result written back to the cache.
    ///
    /// # Errors
    ///
    /// Returns the queue's error once retries are exhausted or the request
    /// was cancelled.
    pub async fn get_preview(
        &self,
        target: &PreviewTarget,
        size: SizeTier,
        options: PreviewOptions,
    ) -> Result<PreviewResponse, PreviewError> {
        let emit = !options.skip_events;

        if !options.skip_cache {
            let key = target.cache_key(size);
            let fresh = self
                .inner
                .cache
                .get_fresh(&key, &target.fingerprint(), target.revision)
                .await;
            if let Some(entry) = fresh {
                if emit {
                    self.inner.events.emit(PreviewEvent::CacheHit {
                        target: target.kind.clone(),
                        size,
                    });
                }
                return Ok(PreviewResponse::cached(entry));
            }
        }

        if emit {
            self.inner.events.emit(PreviewEvent::CacheMiss {
                target: target.kind.clone(),
                size,
            });
        }

        self.render_and_store(target, size, options).await
    }

    /// Get previews for many targets at once.
    ///
    /// Returns exactly one entry per distinct target. Targets that fail get
    /// the placeholder image.
    pub async fn generate_batch(
        &self,
        targets: &[PreviewTarget],
        size: SizeTier,
        options: PreviewOptions,
    ) -> HashMap<TargetKind, Bytes> {
        self.generate_batch_report(targets, size, options)
            .await
            .previews
    }

    /// Like [`generate_batch`](Self::generate_batch), with counts.
    ///
    /// Cached targets are identified in one pass before anything is
    /// dispatched. The rest are generated `batch_chunk_size` at a time at low
    /// priority (unless `options.priority` says otherwise), each settling
    /// independently.
    pub async fn generate_batch_report(
        &self,
        targets: &[PreviewTarget],
        size: SizeTier,
        options: PreviewOptions,
    ) -> BatchReport {
        let emit = !options.skip_events;

        let mut seen = HashSet::new();
        let unique: Vec<&PreviewTarget> = targets
            .iter()
            .filter(|target| seen.insert(target.kind.clone()))
            .collect();

        let mut report = BatchReport::default();
        let mut missing: Vec<PreviewTarget> = Vec::new();

        if options.skip_cache {
            missing.extend(unique.into_iter().cloned());
        } else {
            let lookups: Vec<FreshLookup> = unique
                .iter()
                .map(|target| fresh_lookup(target, size))
                .collect();
            let found = self.inner.cache.get_fresh_many(&lookups).await;

            for (target, entry) in unique.into_iter().zip(found) {
                match entry {
                    Some(entry) => {
                        report.previews.insert(target.kind.clone(), entry.data);
                    }
                    None => missing.push(target.clone()),
                }
            }
        }
        report.cached = report.previews.len();

        if emit {
            self.inner.events.emit(PreviewEvent::BatchStarted {
                size,
                total: report.cached + missing.len(),
                cached: report.cached,
                to_generate: missing.len(),
            });
        }

        let item_options = PreviewOptions {
            priority: Some(options.priority.unwrap_or(Priority::Low)),
            ..options
        };
        let chunk_size = self.inner.config.batch_chunk_size.max(1);
        let mut placeholder: Option<Bytes> = None;

        for chunk in missing.chunks(chunk_size) {
            let handles: Vec<_> = chunk
                .iter()
                .map(|target| {
                    let service = self.clone();
                    let target = target.clone();
                    let kind = target.kind.clone();
                    let handle = tokio::spawn(async move {
                        service.render_and_store(&target, size, item_options).await
                    });
                    (kind, handle)
                })
                .collect();

            for (kind, handle) in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome.map(|response| response.data),
                    Err(err) => {
                        error!(target = %kind, error = %err, "Batch preview task failed");
                        Err(PreviewError::Cancelled)
                    }
                };

                match outcome {
                    Ok(data) => {
                        report.generated += 1;
                        report.previews.insert(kind, data);
                    }
                    Err(_) => {
                        let data = placeholder
                            .get_or_insert_with(|| placeholder_bytes(size, &item_options))
                            .clone();
                        report.previews.insert(kind.clone(), data);
                        report.failed.push(kind);
                    }
                }
            }
        }

        if emit {
            self.inner.events.emit(PreviewEvent::BatchCompleted {
                size,
                total: report.previews.len(),
                cached: report.cached,
                generated: report.generated,
                failed: report.failed.len(),
            });
        }

        debug!(
            size = %size,
            cached = report.cached,
            generated = report.generated,
            failed = report.failed.len(),
            "Batch complete"
        );
        report
    }

    /// Warm the cache in the background.
    ///
    /// Runs at low priority with events suppressed. Targets already fresh in
    /// the cache are skipped without touching recency or counters. Failures
    /// are logged and otherwise ignored.
    pub fn prefetch(&self, targets: Vec<PreviewTarget>, size: SizeTier) -> JoinHandle<()> {
        let service = self.clone();

        tokio::spawn(async move {
            let options = PreviewOptions::new()
                .with_priority(Priority::Low)
                .skip_events();
            let mut seen = HashSet::new();
            let mut handles = Vec::new();

            for target in targets {
                if !seen.insert(target.kind.clone()) {
                    continue;
                }
                let key = target.cache_key(size);
                if let Some(entry) = service.inner.cache.peek(&key).await {
                    // Fresh, or already superseded by a newer revision
                    if entry.source_fingerprint == target.fingerprint()
                        || entry.revision > target.revision
                    {
                        continue;
                    }
                }

                let service = service.clone();
                handles.push(tokio::spawn(async move {
                    if let Err(err) = service.render_and_store(&target, size, options).await {
                        debug!(target = %target, error = %err, "Prefetch failed");
                    }
                }));
            }

            let requested = handles.len();
            for handle in handles {
                let _ = handle.await;
            }
            debug!(size = %size, requested = requested, "Prefetch finished");
        })
    }

    /// Cached preview, if present and fresh. Never renders.
    pub async fn get_cached(&self, target: &PreviewTarget, size: SizeTier) -> Option<Bytes> {
        self.inner
            .cache
            .get_fresh(&target.cache_key(size), &target.fingerprint(), target.revision)
            .await
            .map(|entry| entry.data)
    }

    /// Drop every size tier of one target. Returns the number removed.
    pub async fn invalidate(&self, target: &TargetKind) -> usize {
        let mut removed = 0;
        for size in SizeTier::ALL {
            if self.inner.cache.delete(&target.cache_key(size)).await {
                removed += 1;
            }
        }

        self.inner.events.emit(PreviewEvent::CacheInvalidated {
            target: target.clone(),
            removed,
        });
        debug!(target = %target, removed = removed, "Invalidated preview");
        removed
    }

    /// Drop every preview belonging to a scene, its items included.
    pub async fn invalidate_scene(&self, scene_id: &str) -> usize {
        let removed = self.inner.cache.delete_pattern(&scene_pattern(scene_id)).await;

        self.inner.events.emit(PreviewEvent::SceneInvalidated {
            scene_id: scene_id.to_string(),
            removed,
        });
        debug!(scene_id = scene_id, removed = removed, "Invalidated scene previews");
        removed
    }

    /// Empty the cache. Counters are kept.
    pub async fn clear_cache(&self) -> usize {
        let removed = self.inner.cache.clear().await;
        self.inner
            .events
            .emit(PreviewEvent::CacheCleared { removed });
        info!(removed = removed, "Preview cache cleared");
        removed
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Subscribe to every pipeline event.
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    /// Subscribe to the named events only.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> EventSubscription {
        self.inner.events.subscribe_to(kinds)
    }

    /// Cancel all queued work. Cached previews stay.
    pub fn shutdown(&self) {
        let dropped = self.inner.queue.clear();
        info!(dropped = dropped, "Preview service shut down");
    }

    async fn render_and_store(
        &self,
        target: &PreviewTarget,
        size: SizeTier,
        options: PreviewOptions,
    ) -> Result<PreviewResponse, PreviewError> {
        let item = QueueItem::new(target.clone(), size, options);
        // Removals after this point discard the result instead of caching it
        let epoch = self.inner.cache.epoch().await;

        match self.inner.queue.enqueue(item).await {
            Ok(RenderedPreview { target: source, image }) => {
                let key = source.cache_key(size);
                let entry = CacheEntry::new(
                    key.clone(),
                    image.data.clone(),
                    image.content_hash.clone(),
                    source.fingerprint(),
                    image.width,
                    image.height,
                )
                .with_revision(source.revision);

                if !self.inner.cache.set_if_current(key, entry, epoch).await {
                    debug!(target = %source, size = %size, "Rendered preview not cached");
                }
                Ok(PreviewResponse::generated(image))
            }
            Err(err) => {
                if !options.skip_events {
                    self.inner.events.emit(PreviewEvent::PreviewFailed {
                        target: target.kind.clone(),
                        size,
                        error: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }
}

fn fresh_lookup(target: &PreviewTarget, size: SizeTier) -> FreshLookup {
    FreshLookup {
        key: target.cache_key(size),
        source_fingerprint: target.fingerprint(),
        revision: target.revision,
    }
}

/// Placeholder bytes for a failed batch entry.
fn placeholder_bytes(size: SizeTier, options: &PreviewOptions) -> Bytes {
    match render_placeholder(size.width(), size.height(), options.quality_for(size)) {
        Ok(image) => image.data,
        Err(err) => {
            error!(size = %size, error = %err, "Placeholder render failed");
            Bytes::new()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
