//! Preview cache for encoded thumbnails.
//!
//! This module provides a bounded LRU cache for encoded preview images,
//! so that navigation widgets can redraw without re-rendering.
//!
//! # Eviction
//!
//! The cache holds at most `max_size` entries. Recency is updated on every
//! successful read and every write, and the least-recently-used entry is
//! evicted first. Insertion order plays no role: an entry read a moment ago
//! outlives one that has been untouched for longer.
//!
//! # Statistics
//!
//! Hit, miss and eviction counters are global to the cache and exposed via
//! [`PreviewCache::stats`].
//!
//! # Freshness
//!
//! Every entry records the revision and source fingerprint it was rendered
//! from. A lookup for a newer revision drops the entry; a lookup for an older
//! one misses but leaves it in place. Explicit removals advance an
//! invalidation epoch, and [`PreviewCache::set_if_current`] refuses writes
//! for renders that started before the latest removal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Default maximum number of cached previews.
pub const DEFAULT_PREVIEW_CACHE_CAPACITY: usize = 500;

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached, encoded preview.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key this entry is stored under
    pub key: String,

    /// Encoded image bytes
    pub data: Bytes,

    /// Fingerprint of `data`
    pub content_hash: String,

    /// Fingerprint of the target descriptor the image was rendered from
    pub source_fingerprint: String,

    /// Revision of the target the image was rendered from
    pub revision: u64,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// When the image was rendered
    pub generated_at: Instant,

    /// Last successful read (or the write time)
    pub last_accessed_at: Instant,

    /// Number of successful reads since the entry was written
    pub access_count: u64,
}

impl CacheEntry {
    /// Create a fresh entry stamped with the current time.
    pub fn new(
        key: impl Into<String>,
        data: Bytes,
        content_hash: impl Into<String>,
        source_fingerprint: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            data,
            content_hash: content_hash.into(),
            source_fingerprint: source_fingerprint.into(),
            revision: 0,
            width,
            height,
            generated_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    /// Set the revision the image was rendered from.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }
}

/// One lookup of [`PreviewCache::get_fresh_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshLookup {
    pub key: String,
    pub source_fingerprint: String,
    pub revision: u64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    /// `hit_count / (hit_count + miss_count)`, 0.0 before any lookup
    pub hit_rate: f64,
}

// =============================================================================
// Preview Cache
// =============================================================================

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    max_size: usize,
    /// Advanced by every explicit removal
    epoch: u64,
}

/// LRU cache for encoded previews with an entry-count bound.
///
/// # Thread Safety
///
/// The cache is thread-safe and can be shared across async tasks via `Arc`.
/// Each operation holds the lock for its whole read-modify-write.
///
/// # Example
///
/// ```
/// use scene_preview::preview::{CacheEntry, PreviewCache};
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = PreviewCache::with_capacity(2);
///
///     let entry = CacheEntry::new("k1", Bytes::from_static(b"jpeg"), "h", "f", 80, 60);
///     cache.set("k1", entry).await;
///
///     assert!(cache.get("k1").await.is_some());
///     assert_eq!(cache.stats().await.hit_count, 1);
/// }
/// ```
pub struct PreviewCache {
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PreviewCache {
    /// Create a new cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PREVIEW_CACHE_CAPACITY)
    }

    /// Create a new cache holding at most `max_size` entries (minimum 1).
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: LruCache::unbounded(),
                max_size: max_size.max(1),
                epoch: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get an entry, marking it as most recently used.
    ///
    /// Updates the entry's access bookkeeping and the hit/miss counters.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.write().await;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed_at = Instant::now();
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get an entry only if it was rendered from the given source fingerprint.
    ///
    /// Any other entry counts as a miss. It is removed when its revision is
    /// older than `revision` and kept otherwise.
    pub async fn get_fresh(
        &self,
        key: &str,
        source_fingerprint: &str,
        revision: u64,
    ) -> Option<CacheEntry> {
        let mut state = self.state.write().await;
        self.lookup_fresh(&mut state, key, source_fingerprint, revision)
    }

    /// Run several [`get_fresh`](Self::get_fresh) lookups under one lock.
    ///
    /// Results come back in input order. No other cache operation
    /// interleaves with the batch.
    pub async fn get_fresh_many(&self, lookups: &[FreshLookup]) -> Vec<Option<CacheEntry>> {
        let mut state = self.state.write().await;
        lookups
            .iter()
            .map(|lookup| {
                self.lookup_fresh(
                    &mut state,
                    &lookup.key,
                    &lookup.source_fingerprint,
                    lookup.revision,
                )
            })
            .collect()
    }

    fn lookup_fresh(
        &self,
        state: &mut CacheState,
        key: &str,
        source_fingerprint: &str,
        revision: u64,
    ) -> Option<CacheEntry> {
        let (matches, older) = match state.entries.peek(key) {
            Some(entry) => (
                entry.source_fingerprint == source_fingerprint,
                entry.revision < revision,
            ),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if !matches {
            if older {
                state.entries.pop(key);
                debug!(key = key, revision = revision, "Dropped stale preview");
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.last_accessed_at = Instant::now();
        entry.access_count += 1;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.clone())
    }

    /// Read an entry without touching recency or counters.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        let state = self.state.read().await;
        state.entries.peek(key).cloned()
    }

    /// Check whether a key is cached without updating LRU order.
    pub async fn has(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state.entries.contains(key)
    }

    /// Store an entry as the most recently used.
    ///
    /// An existing entry for the key is replaced. When the cache is full the
    /// least-recently-used entry is evicted first.
    pub async fn set(&self, key: impl Into<String>, entry: CacheEntry) {
        let mut state = self.state.write().await;
        self.insert(&mut state, key.into(), entry);
    }

    /// Store a freshly rendered entry unless it has been overtaken.
    ///
    /// `epoch` is the value of [`epoch`](Self::epoch) read before rendering
    /// started. The write is refused if any removal happened since, or if the
    /// cached entry for the key has a newer revision. Returns whether the
    /// entry was stored.
    pub async fn set_if_current(
        &self,
        key: impl Into<String>,
        entry: CacheEntry,
        epoch: u64,
    ) -> bool {
        let key = key.into();
        let mut state = self.state.write().await;

        if state.epoch != epoch {
            debug!(key = %key, "Discarded preview invalidated while rendering");
            return false;
        }
        if let Some(existing) = state.entries.peek(&key) {
            if existing.revision > entry.revision {
                debug!(
                    key = %key,
                    cached = existing.revision,
                    rendered = entry.revision,
                    "Discarded preview older than cached"
                );
                return false;
            }
        }

        self.insert(&mut state, key, entry);
        true
    }

    /// Current invalidation epoch.
    ///
    /// Advanced by [`delete`](Self::delete),
    /// [`delete_pattern`](Self::delete_pattern) and [`clear`](Self::clear),
    /// whether or not they removed anything.
    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    fn insert(&self, state: &mut CacheState, key: String, entry: CacheEntry) {
        state.entries.pop(&key);

        while state.entries.len() >= state.max_size {
            match state.entries.pop_lru() {
                Some((evicted, _)) => {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %evicted, "Evicted preview");
                }
                None => break,
            }
        }

        state.entries.put(key, entry);
    }

    /// Remove an entry. Returns `true` if it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut state = self.state.write().await;
        state.epoch += 1;
        state.entries.pop(key).is_some()
    }

    /// Remove every entry whose key matches `pattern`.
    ///
    /// `*` matches any run of characters (including none) and `?` matches
    /// exactly one. Returns the number of entries removed.
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        let mut state = self.state.write().await;
        state.epoch += 1;

        let matching: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, _)| wildcard_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &matching {
            state.entries.pop(key);
        }

        matching.len()
    }

    /// Remove all entries. Returns the number removed.
    ///
    /// Counters are kept.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        state.epoch += 1;
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    /// Change the maximum number of entries (minimum 1).
    ///
    /// Shrinking below the current size evicts least-recently-used entries
    /// until the cache fits.
    pub async fn set_max_size(&self, max_size: usize) {
        let mut state = self.state.write().await;
        state.max_size = max_size.max(1);

        while state.entries.len() > state.max_size {
            if state.entries.pop_lru().is_none() {
                break;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current number of entries.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Check if the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Snapshot of size and counters.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);
        let lookups = hit_count + miss_count;

        CacheStats {
            size: state.entries.len(),
            max_size: state.max_size,
            hit_count,
            miss_count,
            eviction_count: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hit_count as f64 / lookups as f64
            },
        }
    }
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Wildcard Matching
// =============================================================================

/// Match `text` against a pattern where `*` is any run and `?` one character.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, tried)) = backtrack {
            p = star + 1;
            t = tried + 1;
            backtrack = Some((star, tried + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

// =============================================================================
// Tests
// =============================================================================
