//! Render queue with debouncing, priorities, bounded concurrency and retries.
//!
//! # Lifecycle of a request
//!
//! ```text
//! enqueue ──► debouncing ──(timer fires)──► ready ──(slot free)──► in flight
//!               │   ▲                        │  ▲                     │
//!               └───┘ same key: restart      └──┘ same key: merge     ├─ ok ───────► waiters
//!                     timer, keep max         priority, re-sort       ├─ retryable ─► ready
//!                     priority                                        └─ fatal ─────► waiters
//! ```
//!
//! - **Debouncing**: every key has its own timer. A new request for the same
//!   key restarts it; only a timer that fires without being superseded moves
//!   the item into the ready list.
//! - **Coalescing**: a pending key (`target` + `size`) exists at most once.
//!   Duplicates join the existing item's waiters and only ever raise its
//!   priority.
//! - **Ordering**: priority descending, then age ascending. Dispatched items
//!   are never preempted.
//! - **Concurrency**: at most `max_concurrent` renders run at once.
//! - **Retries**: retryable failures re-enter the ready list (priority kept,
//!   age reset) until `max_attempts` is reached.
//!
//! Every caller waits on its own oneshot channel; a merged request receives
//! the same shared result as the request it merged into. The result names the
//! target actually rendered, which for merged requests is the highest
//! revision any of them asked for.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{PreviewError, RenderError};

use super::events::{EventBus, PreviewEvent};
use super::render::{RenderRequest, RenderedImage, Renderer};
use super::target::{PreviewOptions, PreviewTarget, Priority, SizeTier};

/// Default debounce window per key.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Default number of renders allowed in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Default number of attempts per item (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default upper bound on a single render call.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for [`PreviewQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub debounce: Duration,
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub render_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }
}

impl QueueConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_render_timeout(mut self, render_timeout: Duration) -> Self {
        self.render_timeout = render_timeout;
        self
    }
}

// =============================================================================
// Queue Item
// =============================================================================

/// A unit of render work.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub target: PreviewTarget,
    pub size: SizeTier,
    pub options: PreviewOptions,
    pub priority: Priority,
    pub enqueued_at: Instant,
    /// Render attempts made so far
    pub attempts: u32,
}

impl QueueItem {
    /// Create an item; priority comes from `options` (default normal).
    pub fn new(target: PreviewTarget, size: SizeTier, options: PreviewOptions) -> Self {
        Self {
            target,
            size,
            priority: options.priority.unwrap_or_default(),
            options,
            enqueued_at: Instant::now(),
            attempts: 0,
        }
    }

    /// Coalescing key (same as the cache key).
    pub fn key(&self) -> String {
        self.target.cache_key(self.size)
    }

    fn render_request(&self) -> RenderRequest {
        RenderRequest {
            target: self.target.clone(),
            width: self.size.width(),
            height: self.size.height(),
            quality: self.options.quality_for(self.size),
        }
    }
}

/// A finished render and the target it was rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPreview {
    pub target: PreviewTarget,
    pub image: RenderedImage,
}

// =============================================================================
// Internal State
// =============================================================================

type Outcome = Result<RenderedPreview, PreviewError>;

enum Stage {
    Debouncing { timer: JoinHandle<()>, timer_id: u64 },
    Queued,
}

struct Pending {
    item: QueueItem,
    waiters: Vec<oneshot::Sender<Outcome>>,
    stage: Stage,
    /// Insertion order into the ready list, breaks age ties
    seq: u64,
}

impl Pending {
    /// Fold a duplicate request into this item.
    ///
    /// Returns `true` if the priority was raised.
    fn merge(&mut self, incoming: &QueueItem) -> bool {
        // Render the newest content any merged caller asked for
        if incoming.target.revision > self.item.target.revision {
            self.item.target = incoming.target.clone();
        }
        // Events are shown if any merged caller wants them
        self.item.options.skip_events &= incoming.options.skip_events;

        if incoming.priority > self.item.priority {
            self.item.priority = incoming.priority;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, Pending>,
    /// Keys of queued items in dispatch order
    ready: Vec<String>,
    active: usize,
    next_seq: u64,
    next_timer_id: u64,
    /// Bumped by `clear()`; in-flight items from an older epoch are not retried
    epoch: u64,
}

impl QueueState {
    fn sort_ready(&mut self) {
        let QueueState { pending, ready, .. } = self;
        ready.sort_by(|a, b| match (pending.get(a), pending.get(b)) {
            (Some(a), Some(b)) => dispatch_order(a, b),
            _ => Ordering::Equal,
        });
    }

    fn push_ready(&mut self, key: String) {
        self.ready.push(key);
        self.sort_ready();
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

fn dispatch_order(a: &Pending, b: &Pending) -> Ordering {
    b.item
        .priority
        .cmp(&a.item.priority)
        .then(a.item.enqueued_at.cmp(&b.item.enqueued_at))
        .then(a.seq.cmp(&b.seq))
}

fn deliver(waiters: Vec<oneshot::Sender<Outcome>>, outcome: Outcome) {
    for waiter in waiters {
        // The caller may have stopped waiting
        let _ = waiter.send(outcome.clone());
    }
}

// =============================================================================
// Preview Queue
// =============================================================================

struct QueueInner<R> {
    renderer: R,
    config: QueueConfig,
    events: EventBus,
    state: Mutex<QueueState>,
}

/// Debouncing, prioritised, concurrency-bounded front of a [`Renderer`].
///
/// Cloning is cheap and yields a handle to the same queue.
///
/// # Example
///
/// ```ignore
/// let queue = PreviewQueue::new(renderer, QueueConfig::default(), EventBus::new());
///
/// let item = QueueItem::new(PreviewTarget::slide("s1", "a"), SizeTier::Sm, PreviewOptions::new());
/// let rendered = queue.enqueue(item).await?;
/// ```
pub struct PreviewQueue<R> {
    inner: Arc<QueueInner<R>>,
}

impl<R> Clone for PreviewQueue<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Renderer + 'static> PreviewQueue<R> {
    /// Create a queue in front of `renderer`, publishing progress on `events`.
    pub fn new(renderer: R, config: QueueConfig, events: EventBus) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                renderer,
                config,
                events,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// The queue's configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Submit a request and wait for its (possibly shared) result.
    ///
    /// # Errors
    ///
    /// - [`PreviewError::Render`] once the render failed for good
    /// - [`PreviewError::Cancelled`] if the queue was cleared first
    pub async fn enqueue(&self, item: QueueItem) -> Result<RenderedPreview, PreviewError> {
        let (tx, rx) = oneshot::channel();
        self.submit(item, tx);
        rx.await.unwrap_or(Err(PreviewError::Cancelled))
    }

    /// Number of items waiting in the ready list.
    pub fn queue_size(&self) -> usize {
        self.state().ready.len()
    }

    /// Number of items whose debounce timer has not fired yet.
    pub fn debouncing(&self) -> usize {
        self.state()
            .pending
            .values()
            .filter(|p| matches!(p.stage, Stage::Debouncing { .. }))
            .count()
    }

    /// Number of renders currently in flight.
    pub fn concurrent(&self) -> usize {
        self.state().active
    }

    /// Cancel timers and drop every debouncing or queued item.
    ///
    /// Their callers resolve with [`PreviewError::Cancelled`]. Renders
    /// already in flight finish normally but are not retried. Returns the
    /// number of items dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        let dropped = state.pending.len();

        for (_, pending) in state.pending.drain() {
            if let Stage::Debouncing { timer, .. } = pending.stage {
                timer.abort();
            }
        }
        state.ready.clear();
        state.epoch += 1;

        if dropped > 0 {
            debug!(dropped = dropped, "Preview queue cleared");
        }
        dropped
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, mut item: QueueItem, waiter: oneshot::Sender<Outcome>) {
        let key = item.key();
        let mut state = self.state();
        let timer_id = state.next_timer_id;
        state.next_timer_id += 1;

        if let Some(pending) = state.pending.get_mut(&key) {
            pending.waiters.push(waiter);
            let raised = pending.merge(&item);

            let resort = match &mut pending.stage {
                Stage::Debouncing {
                    timer,
                    timer_id: current,
                } => {
                    timer.abort();
                    *timer = self.spawn_timer(key.clone(), timer_id);
                    *current = timer_id;
                    debug!(key = %key, "Debounce restarted");
                    false
                }
                Stage::Queued => raised,
            };

            if resort {
                debug!(key = %key, priority = ?item.priority, "Raised queued priority");
                state.sort_ready();
            }
            return;
        }

        item.enqueued_at = Instant::now();
        let timer = self.spawn_timer(key.clone(), timer_id);
        state.pending.insert(
            key,
            Pending {
                item,
                waiters: vec![waiter],
                stage: Stage::Debouncing { timer, timer_id },
                seq: 0,
            },
        );
    }

    fn spawn_timer(&self, key: String, timer_id: u64) -> JoinHandle<()> {
        let queue = self.clone();
        let delay = self.inner.config.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.promote(&key, timer_id);
        })
    }

    /// Move a debounced item into the ready list if its timer is current.
    fn promote(&self, key: &str, timer_id: u64) {
        {
            let mut state = self.state();
            let seq = state.take_seq();

            match state.pending.get_mut(key) {
                Some(pending)
                    if matches!(pending.stage, Stage::Debouncing { timer_id: id, .. } if id == timer_id) =>
                {
                    pending.stage = Stage::Queued;
                    pending.seq = seq;
                }
                _ => return,
            }

            state.push_ready(key.to_string());
        }
        self.pump();
    }

    /// Dispatch ready items while slots are free.
    fn pump(&self) {
        loop {
            let (item, waiters, epoch) = {
                let mut state = self.state();
                if state.active >= self.inner.config.max_concurrent || state.ready.is_empty() {
                    return;
                }

                let key = state.ready.remove(0);
                let Some(pending) = state.pending.remove(&key) else {
                    continue;
                };
                state.active += 1;
                (pending.item, pending.waiters, state.epoch)
            };

            let queue = self.clone();
            let slot = Slot {
                queue: self.clone(),
            };
            tokio::spawn(async move {
                queue.run(item, waiters, epoch, slot).await;
            });
        }
    }

    async fn run(
        &self,
        mut item: QueueItem,
        waiters: Vec<oneshot::Sender<Outcome>>,
        epoch: u64,
        slot: Slot<R>,
    ) {
        item.attempts += 1;
        let config = &self.inner.config;
        let emit = !item.options.skip_events;

        if emit {
            self.inner.events.emit(PreviewEvent::generating(
                &item.target,
                item.size,
                item.attempts,
            ));
        }

        let request = item.render_request();
        let result =
            match tokio::time::timeout(config.render_timeout, self.inner.renderer.render(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RenderError::Timeout {
                    after_ms: config.render_timeout.as_millis() as u64,
                }),
            };

        match result {
            Ok(image) => {
                drop(slot);
                if emit {
                    self.inner.events.emit(PreviewEvent::PreviewReady {
                        target: item.target.kind.clone(),
                        size: item.size,
                        bytes: image.data.len(),
                    });
                }
                deliver(
                    waiters,
                    Ok(RenderedPreview {
                        target: item.target,
                        image,
                    }),
                );
            }
            Err(err) if err.is_retryable() && item.attempts < config.max_attempts => {
                warn!(
                    key = %item.key(),
                    attempt = item.attempts,
                    max_attempts = config.max_attempts,
                    error = %err,
                    "Preview render failed, retrying"
                );
                self.requeue(item, waiters, epoch);
                drop(slot);
            }
            Err(err) => {
                warn!(
                    key = %item.key(),
                    attempts = item.attempts,
                    error = %err,
                    "Preview render failed"
                );
                drop(slot);
                deliver(
                    waiters,
                    Err(PreviewError::Render {
                        attempts: item.attempts,
                        source: err,
                    }),
                );
            }
        }
    }

    fn release(&self) {
        let mut state = self.state();
        state.active = state.active.saturating_sub(1);
    }

    /// Put a failed item back into the ready list, merging with any new
    /// pending request for the same key.
    fn requeue(&self, mut item: QueueItem, waiters: Vec<oneshot::Sender<Outcome>>, epoch: u64) {
        let mut state = self.state();

        if state.epoch != epoch {
            drop(state);
            deliver(waiters, Err(PreviewError::Cancelled));
            return;
        }

        let key = item.key();
        if let Some(pending) = state.pending.get_mut(&key) {
            pending.waiters.extend(waiters);
            let raised = pending.merge(&item);
            if raised && matches!(pending.stage, Stage::Queued) {
                state.sort_ready();
            }
            return;
        }

        item.enqueued_at = Instant::now();
        let seq = state.take_seq();
        state.pending.insert(
            key.clone(),
            Pending {
                item,
                waiters,
                stage: Stage::Queued,
                seq,
            },
        );
        state.push_ready(key);
    }
}

/// One concurrency slot, held by a dispatched render.
///
/// Dropping it frees the slot and dispatches the next ready item, including
/// when the render task panics.
struct Slot<R: Renderer + 'static> {
    queue: PreviewQueue<R>,
}

impl<R: Renderer + 'static> Drop for Slot<R> {
    fn drop(&mut self) {
        self.queue.release();
        // A runtime tearing down drops tasks outside its context
        if tokio::runtime::Handle::try_current().is_ok() {
            self.queue.pump();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
