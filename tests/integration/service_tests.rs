//! Service integration tests.
//!
//! Tests verify:
//! - Cache-first generation and hit-rate accounting
//! - Debounce coalescing seen through the service
//! - Explicit and revision-driven staleness
//! - Scene bulk invalidation
//! - Batch completeness and per-item failure isolation
//! - Event stream contents

use std::sync::Arc;
use std::time::Duration;

use scene_preview::config::PipelineConfig;
use scene_preview::preview::{
    render_placeholder, EventKind, PreviewEvent, PreviewOptions, PreviewTarget, SizeTier,
    TargetKind, TargetKindTag,
};
use scene_preview::RenderError;

use super::test_utils::{
    is_valid_jpeg, swatch_renderer, CountingRenderer, FaultyRenderer, GatedRenderer,
};

fn counting_service() -> (
    Arc<CountingRenderer>,
    scene_preview::PreviewService<Arc<CountingRenderer>>,
) {
    let renderer = Arc::new(CountingRenderer::new());
    let service = PipelineConfig::default().build(Arc::clone(&renderer));
    (renderer, service)
}

// =============================================================================
// Cache-First Generation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_structurally_equal_targets_share_entry() {
    let (renderer, service) = counting_service();

    let first = PreviewTarget::slide("s1", "sl1");
    let second = PreviewTarget::slide(String::from("s1"), String::from("sl1"));

    let a = service
        .generate_preview(&first, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    let b = service
        .generate_preview(&second, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();

    assert_eq!(a, b);
    assert!(is_valid_jpeg(&a));
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hit_rate_after_miss_then_hit() {
    let (_, service) = counting_service();
    let target = PreviewTarget::scene("s1");

    service
        .generate_preview(&target, SizeTier::Xs, PreviewOptions::new())
        .await
        .unwrap();
    service
        .generate_preview(&target, SizeTier::Xs, PreviewOptions::new())
        .await
        .unwrap();

    let stats = service.cache_stats().await;
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.hit_rate, 0.5);
    assert_eq!(stats.size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_size_tiers_are_separate_entries() {
    let (renderer, service) = counting_service();
    let target = PreviewTarget::node("graph", "n1");

    for size in SizeTier::ALL {
        service
            .generate_preview(&target, size, PreviewOptions::new())
            .await
            .unwrap();
    }

    assert_eq!(renderer.calls(), 3);
    assert_eq!(service.cache_stats().await.size, 3);
}

#[tokio::test(start_paused = true)]
async fn test_five_callers_one_render() {
    let (renderer, service) = counting_service();
    let target = PreviewTarget::page("doc", "p1");
    let generate = || service.generate_preview(&target, SizeTier::Md, PreviewOptions::new());

    let (a, b, c, d, e) = tokio::join!(generate(), generate(), generate(), generate(), generate());

    assert_eq!(renderer.calls(), 1);
    let first = a.unwrap();
    for other in [b, c, d, e] {
        assert_eq!(other.unwrap(), first);
    }
}

#[tokio::test(start_paused = true)]
async fn test_lru_eviction_through_service() {
    let renderer = Arc::new(CountingRenderer::new());
    let service = PipelineConfig {
        cache_entries: 3,
        ..PipelineConfig::default()
    }
    .build(Arc::clone(&renderer));
    let k = |id: &str| PreviewTarget::slide("deck", id);

    for id in ["k1", "k2", "k3"] {
        service
            .generate_preview(&k(id), SizeTier::Xs, PreviewOptions::new())
            .await
            .unwrap();
    }
    assert!(service.get_cached(&k("k1"), SizeTier::Xs).await.is_some());
    service
        .generate_preview(&k("k4"), SizeTier::Xs, PreviewOptions::new())
        .await
        .unwrap();

    assert!(service.get_cached(&k("k2"), SizeTier::Xs).await.is_none());
    for id in ["k1", "k3", "k4"] {
        assert!(service.get_cached(&k(id), SizeTier::Xs).await.is_some());
    }
    assert_eq!(service.cache_stats().await.eviction_count, 1);
}

// =============================================================================
// Staleness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalidate_then_regenerate() {
    let (renderer, service) = counting_service();
    let target = PreviewTarget::slide("s1", "a");

    service
        .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    service.invalidate(&target.kind).await;

    assert!(service.get_cached(&target, SizeTier::Sm).await.is_none());

    service
        .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    assert_eq!(renderer.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_revision_needs_explicit_invalidate() {
    let (renderer, service) = counting_service();
    let target = PreviewTarget::slide("s1", "a");

    service
        .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();

    // Content edited but the caller did not bump the revision
    let edited = PreviewTarget::slide("s1", "a");
    service
        .generate_preview(&edited, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();

    assert_eq!(renderer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_revision_bump_rerenders_without_invalidate() {
    let (renderer, service) = counting_service();
    let v1 = PreviewTarget::slide("s1", "a").with_revision(1);
    let v2 = PreviewTarget::slide("s1", "a").with_revision(2);

    let old = service
        .generate_preview(&v1, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    let new = service
        .generate_preview(&v2, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();

    assert_eq!(renderer.calls(), 2);
    assert_ne!(old, new);

    // The old revision is now the stale one
    assert!(service.get_cached(&v1, SizeTier::Sm).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_merged_revisions_store_rendered_revision() {
    let (renderer, service) = counting_service();
    let v1 = PreviewTarget::slide("s", "a").with_revision(1);
    let v2 = PreviewTarget::slide("s", "a").with_revision(2);

    let (old, new) = tokio::join!(
        service.generate_preview(&v1, SizeTier::Sm, PreviewOptions::new()),
        service.generate_preview(&v2, SizeTier::Sm, PreviewOptions::new()),
    );

    let (old, new) = (old.unwrap(), new.unwrap());

    assert_eq!(renderer.calls(), 1);
    assert_eq!(old, new);
    assert!(service.get_cached(&v1, SizeTier::Sm).await.is_none());
    assert_eq!(service.get_cached(&v2, SizeTier::Sm).await, Some(new));
    assert_eq!(renderer.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_during_render_is_not_undone() {
    let (gated, gate) = GatedRenderer::new();
    let service = PipelineConfig::default().build(gated);
    let target = PreviewTarget::slide("s", "a");

    let pending = {
        let service = service.clone();
        let target = target.clone();
        tokio::spawn(async move {
            service
                .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(service.queue().concurrent(), 1);

    // Content edited while the old render is still running
    assert_eq!(service.invalidate(&target.kind).await, 0);
    gate.add_permits(1);

    assert!(pending.await.unwrap().is_ok());
    assert!(service.get_cached(&target, SizeTier::Sm).await.is_none());

    gate.add_permits(1);
    service
        .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    assert!(service.get_cached(&target, SizeTier::Sm).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_scene_invalidation_during_render_is_not_undone() {
    let (gated, gate) = GatedRenderer::new();
    let service = PipelineConfig::default().build(gated);
    let target = PreviewTarget::node("s", "n1");

    let pending = {
        let service = service.clone();
        let target = target.clone();
        tokio::spawn(async move {
            service
                .generate_preview(&target, SizeTier::Xs, PreviewOptions::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(350)).await;

    service.invalidate_scene("s").await;
    gate.add_permits(1);

    assert!(pending.await.unwrap().is_ok());
    assert!(service.get_cached(&target, SizeTier::Xs).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scene_bulk_invalidation() {
    let (_, service) = counting_service();
    let targets = [
        PreviewTarget::scene("s1"),
        PreviewTarget::slide("s1", "a"),
        PreviewTarget::slide("s1", "b"),
        PreviewTarget::slide("s2", "c"),
        PreviewTarget::slide("s10", "d"),
    ];
    for target in &targets {
        service
            .generate_preview(target, SizeTier::Sm, PreviewOptions::new())
            .await
            .unwrap();
    }

    assert_eq!(service.invalidate_scene("s1").await, 3);

    for target in &targets[..3] {
        assert!(service.get_cached(target, SizeTier::Sm).await.is_none());
    }
    assert!(service.get_cached(&targets[3], SizeTier::Sm).await.is_some());
    assert!(service.get_cached(&targets[4], SizeTier::Sm).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_ids_with_wildcards_do_not_leak() {
    let (_, service) = counting_service();
    let odd = PreviewTarget::slide("s*", "a");
    let plain = PreviewTarget::slide("sx", "b");

    for target in [&odd, &plain] {
        service
            .generate_preview(target, SizeTier::Xs, PreviewOptions::new())
            .await
            .unwrap();
    }

    assert_eq!(service.invalidate_scene("s*").await, 1);
    assert!(service.get_cached(&plain, SizeTier::Xs).await.is_some());
}

// =============================================================================
// Batch
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_returns_entry_per_target() {
    let (renderer, service) = counting_service();
    let t1 = PreviewTarget::slide("s1", "a");
    let t2 = PreviewTarget::slide("s1", "b");
    let t3 = PreviewTarget::page("doc", "p1");

    // One of the three is already cached
    service
        .generate_preview(&t1, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();

    let report = service
        .generate_batch_report(&[t1.clone(), t2.clone(), t3.clone()], SizeTier::Sm, PreviewOptions::new())
        .await;

    assert_eq!(report.previews.len(), 3);
    assert_eq!(report.cached, 1);
    assert_eq!(report.generated, 2);
    assert!(report.failed.is_empty());
    for target in [&t1, &t2, &t3] {
        assert!(report.previews.contains_key(&target.kind));
    }
    assert_eq!(renderer.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_batch_larger_than_chunk() {
    let (renderer, service) = counting_service();
    let targets: Vec<_> = (0..10)
        .map(|i| PreviewTarget::node("g", format!("n{}", i)))
        .collect();

    let previews = service
        .generate_batch(&targets, SizeTier::Xs, PreviewOptions::new())
        .await;

    assert_eq!(previews.len(), 10);
    assert_eq!(renderer.calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_matches_unsupported_placeholder() {
    // Pages have no drawer; slide "bad" fails permanently
    let renderer = FaultyRenderer::new(swatch_renderer(&[TargetKindTag::Slide]))
        .with_fault("bad", RenderError::permanent("corrupt slide"));
    let service = PipelineConfig::default().build(renderer);

    let good = PreviewTarget::slide("s1", "good");
    let bad = PreviewTarget::slide("s1", "bad");
    let unsupported = PreviewTarget::page("doc", "p1");

    let report = service
        .generate_batch_report(
            &[good.clone(), bad.clone(), unsupported.clone()],
            SizeTier::Sm,
            PreviewOptions::new(),
        )
        .await;

    assert_eq!(report.previews.len(), 3);
    assert_eq!(report.failed, vec![bad.kind.clone()]);
    assert_eq!(report.generated, 2);

    let placeholder = render_placeholder(160, 120, 75).unwrap().data;
    assert_eq!(report.previews[&bad.kind], placeholder);
    assert_eq!(report.previews[&unsupported.kind], placeholder);
    assert_ne!(report.previews[&good.kind], placeholder);

    // Failed entries are not cached
    assert!(service.get_cached(&bad, SizeTier::Sm).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_batch_events_carry_counts() {
    let (_, service) = counting_service();
    let mut events = service.subscribe_to(&[EventKind::BatchStarted, EventKind::BatchCompleted]);
    let target = PreviewTarget::scene("s1");

    service
        .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    service
        .generate_batch(
            &[target.clone(), PreviewTarget::scene("s2")],
            SizeTier::Sm,
            PreviewOptions::new(),
        )
        .await;

    assert_eq!(
        events.drain(),
        vec![
            PreviewEvent::BatchStarted {
                size: SizeTier::Sm,
                total: 2,
                cached: 1,
                to_generate: 1,
            },
            PreviewEvent::BatchCompleted {
                size: SizeTier::Sm,
                total: 2,
                cached: 1,
                generated: 1,
                failed: 0,
            },
        ]
    );
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_generation_event_sequence() {
    let (_, service) = counting_service();
    let mut events = service.subscribe();
    let target = PreviewTarget::slide("s1", "a");

    service
        .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    service
        .generate_preview(&target, SizeTier::Sm, PreviewOptions::new())
        .await
        .unwrap();
    service.invalidate(&target.kind).await;
    service.clear_cache().await;

    let kinds: Vec<_> = events.drain().iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::CacheMiss,
            EventKind::PreviewGenerating,
            EventKind::PreviewReady,
            EventKind::CacheHit,
            EventKind::CacheInvalidated,
            EventKind::CacheCleared,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_events_carry_target_and_size() {
    let (_, service) = counting_service();
    let mut events = service.subscribe_to(&[EventKind::CacheMiss]);
    let target = PreviewTarget::node("g", "n1");

    service
        .generate_preview(&target, SizeTier::Md, PreviewOptions::new())
        .await
        .unwrap();

    assert_eq!(
        events.try_recv(),
        Some(PreviewEvent::CacheMiss {
            target: TargetKind::Node {
                scene_id: "g".to_string(),
                node_id: "n1".to_string(),
            },
            size: SizeTier::Md,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_skip_events_suppresses_stream() {
    let (_, service) = counting_service();
    let mut events = service.subscribe();

    service
        .generate_preview(
            &PreviewTarget::scene("quiet"),
            SizeTier::Xs,
            PreviewOptions::new().skip_events(),
        )
        .await
        .unwrap();

    assert!(events.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_generation_emits_event() {
    let renderer = FaultyRenderer::new(swatch_renderer(&[TargetKindTag::Scene]))
        .with_fault("s1", RenderError::unavailable("no surface"));
    let service = PipelineConfig::default().build(renderer);
    let mut failed = service.subscribe_to(&[EventKind::PreviewFailed]);

    let result = service
        .generate_preview(&PreviewTarget::scene("s1"), SizeTier::Sm, PreviewOptions::new())
        .await;

    assert!(result.is_err());
    assert!(matches!(
        failed.try_recv(),
        Some(PreviewEvent::PreviewFailed { size: SizeTier::Sm, .. })
    ));
}
