//! Preview event stream.
//!
//! Collaborators (tree views, carousels, status bars) follow the pipeline by
//! subscribing to a single typed stream of [`PreviewEvent`]s. Events are
//! delivered over a `tokio::sync::broadcast` channel: every subscriber sees
//! every event at most once, in emission order. Dropping an
//! [`EventSubscription`] unsubscribes it.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use super::target::{PreviewTarget, SizeTier, TargetKind};

/// Default number of events buffered per subscriber before it lags.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable happened in the preview pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PreviewEvent {
    CacheHit {
        target: TargetKind,
        size: SizeTier,
    },
    CacheMiss {
        target: TargetKind,
        size: SizeTier,
    },
    CacheInvalidated {
        target: TargetKind,
        removed: usize,
    },
    SceneInvalidated {
        scene_id: String,
        removed: usize,
    },
    CacheCleared {
        removed: usize,
    },
    BatchStarted {
        size: SizeTier,
        total: usize,
        cached: usize,
        to_generate: usize,
    },
    BatchCompleted {
        size: SizeTier,
        total: usize,
        cached: usize,
        generated: usize,
        failed: usize,
    },
    PreviewGenerating {
        target: TargetKind,
        size: SizeTier,
        attempt: u32,
    },
    PreviewReady {
        target: TargetKind,
        size: SizeTier,
        bytes: usize,
    },
    PreviewFailed {
        target: TargetKind,
        size: SizeTier,
        error: String,
    },
}

impl PreviewEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PreviewEvent::CacheHit { .. } => EventKind::CacheHit,
            PreviewEvent::CacheMiss { .. } => EventKind::CacheMiss,
            PreviewEvent::CacheInvalidated { .. } => EventKind::CacheInvalidated,
            PreviewEvent::SceneInvalidated { .. } => EventKind::SceneInvalidated,
            PreviewEvent::CacheCleared { .. } => EventKind::CacheCleared,
            PreviewEvent::BatchStarted { .. } => EventKind::BatchStarted,
            PreviewEvent::BatchCompleted { .. } => EventKind::BatchCompleted,
            PreviewEvent::PreviewGenerating { .. } => EventKind::PreviewGenerating,
            PreviewEvent::PreviewReady { .. } => EventKind::PreviewReady,
            PreviewEvent::PreviewFailed { .. } => EventKind::PreviewFailed,
        }
    }

    pub(crate) fn generating(target: &PreviewTarget, size: SizeTier, attempt: u32) -> Self {
        PreviewEvent::PreviewGenerating {
            target: target.kind.clone(),
            size,
            attempt,
        }
    }
}

/// Event names, used to filter a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CacheHit,
    CacheMiss,
    CacheInvalidated,
    SceneInvalidated,
    CacheCleared,
    BatchStarted,
    BatchCompleted,
    PreviewGenerating,
    PreviewReady,
    PreviewFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CacheHit => "cache-hit",
            EventKind::CacheMiss => "cache-miss",
            EventKind::CacheInvalidated => "cache-invalidated",
            EventKind::SceneInvalidated => "scene-invalidated",
            EventKind::CacheCleared => "cache-cleared",
            EventKind::BatchStarted => "batch-started",
            EventKind::BatchCompleted => "batch-completed",
            EventKind::PreviewGenerating => "preview-generating",
            EventKind::PreviewReady => "preview-ready",
            EventKind::PreviewFailed => "preview-failed",
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Publisher side of the event stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PreviewEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Events with no subscribers are dropped.
    pub fn emit(&self, event: PreviewEvent) {
        trace!(event = event.kind().as_str(), "Preview event");
        // An error only means nobody is listening
        let _ = self.sender.send(event);
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            kinds: None,
        }
    }

    /// Subscribe to the named events only.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            kinds: Some(kinds.to_vec()),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the event stream. Drop to unsubscribe.
pub struct EventSubscription {
    receiver: broadcast::Receiver<PreviewEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl EventSubscription {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once the bus is gone. A subscriber that fell behind
    /// skips the events it missed.
    pub async fn recv(&mut self) -> Option<PreviewEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<PreviewEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every matching event currently buffered.
    pub fn drain(&mut self) -> Vec<PreviewEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn accepts(&self, event: &PreviewEvent) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&event.kind()),
            None => true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
