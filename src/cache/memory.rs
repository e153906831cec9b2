//! In-process LRU cache of decoded bitmaps with reference counting.
//!
//! # Eviction
//!
//! The cache tracks the byte size of every entry. When the total exceeds the
//! capacity, least-recently-used entries whose reference count is zero are
//! evicted until the total fits or no unreferenced entry remains. Referenced
//! entries are never evicted, so the capacity is a soft bound while leases are
//! outstanding.
//!
//! # References
//!
//! `get` and `put` hand out a [`MemoryLease`]. Dropping the lease releases the
//! reference and lets the entry become evictable again. Reference counts and
//! eviction scans run under the same lock.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lru::LruCache;
use serde::Serialize;
use tracing::debug;

use crate::decode::{Bitmap, ImageInfo};
use crate::request::RequestKey;

/// Default capacity: 64MB of pixel data
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// A decoded bitmap together with what is known about how it was produced.
#[derive(Debug)]
pub struct CachedImage {
    pub bitmap: Arc<Bitmap>,
    pub image_info: ImageInfo,
    pub transformations: Vec<String>,
}

impl CachedImage {
    pub fn new(bitmap: Arc<Bitmap>, image_info: ImageInfo, transformations: Vec<String>) -> Self {
        Self {
            bitmap,
            image_info,
            transformations,
        }
    }

    /// Memory cache weight: the size of the pixel buffer.
    pub fn size(&self) -> usize {
        self.bitmap.byte_count()
    }
}

// =============================================================================
// State
// =============================================================================

struct Entry {
    image: Arc<CachedImage>,
    size: usize,
    refs: usize,
    generation: u64,
}

struct State {
    lru: LruCache<RequestKey, Entry>,
    current_size: usize,
    max_size: usize,
    next_generation: u64,
    hits: u64,
    misses: u64,
}

impl State {
    /// Evict unreferenced entries, oldest first, until `current_size <= target`.
    fn evict_to(&mut self, target: usize) -> usize {
        let mut evicted = 0;
        while self.current_size > target {
            let victim = self
                .lru
                .iter()
                .rev()
                .find(|(_, entry)| entry.refs == 0)
                .map(|(key, _)| key.clone());

            let Some(key) = victim else {
                break;
            };
            if let Some(entry) = self.lru.pop(&key) {
                self.current_size = self.current_size.saturating_sub(entry.size);
                evicted += 1;
                debug!(key = %key, size = entry.size, "Evicted bitmap from memory cache");
            }
        }
        evicted
    }

    fn release(&mut self, key: &RequestKey, generation: u64) {
        if let Some(entry) = self.lru.peek_mut(key) {
            if entry.generation == generation && entry.refs > 0 {
                entry.refs -= 1;
            }
        }
        if self.current_size > self.max_size {
            let max_size = self.max_size;
            self.evict_to(max_size);
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MemoryCache
// =============================================================================

/// Size-bounded LRU cache of decoded bitmaps.
///
/// Cloning is cheap; clones share the same storage.
#[derive(Clone)]
pub struct MemoryCache {
    state: Arc<Mutex<State>>,
}

impl MemoryCache {
    /// Create a cache with the default capacity (64MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes of unreferenced bitmaps.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                lru: LruCache::unbounded(),
                current_size: 0,
                max_size,
                next_generation: 0,
                hits: 0,
                misses: 0,
            })),
        }
    }

    fn lease(&self, key: RequestKey, entry: &Entry) -> MemoryLease {
        MemoryLease {
            key,
            generation: entry.generation,
            image: entry.image.clone(),
            state: Arc::downgrade(&self.state),
        }
    }

    /// Look up `key`, marking it most recently used and taking a reference.
    pub fn get(&self, key: &RequestKey) -> Option<MemoryLease> {
        let mut state = lock(&self.state);
        match state.lru.get_mut(key) {
            Some(entry) => {
                entry.refs += 1;
                let lease = self.lease(key.clone(), entry);
                state.hits += 1;
                Some(lease)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Take a reference on `key` without counting a hit or a miss.
    pub fn acquire(&self, key: &RequestKey) -> Option<MemoryLease> {
        let mut state = lock(&self.state);
        let entry = state.lru.get_mut(key)?;
        entry.refs += 1;
        Some(self.lease(key.clone(), entry))
    }

    /// The cached image without touching recency or reference counts.
    pub fn peek(&self, key: &RequestKey) -> Option<Arc<CachedImage>> {
        lock(&self.state).lru.peek(key).map(|e| e.image.clone())
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        lock(&self.state).lru.contains(key)
    }

    /// Insert `image` under `key` and take a reference on the winner.
    ///
    /// An existing entry is replaced only when nobody references it;
    /// otherwise the new image is discarded and the lease points at the
    /// entry already held by other consumers.
    pub fn put(&self, key: RequestKey, image: Arc<CachedImage>, size: usize) -> MemoryLease {
        let mut state = lock(&self.state);

        if let Some(existing) = state.lru.get_mut(&key) {
            if existing.refs > 0 {
                existing.refs += 1;
                debug!(key = %key, "Keeping referenced bitmap, discarding new one");
                return self.lease(key, existing);
            }
        }

        if let Some(old) = state.lru.pop(&key) {
            state.current_size = state.current_size.saturating_sub(old.size);
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let entry = Entry {
            image,
            size,
            refs: 1,
            generation,
        };
        let lease = self.lease(key.clone(), &entry);
        state.lru.put(key, entry);
        state.current_size += size;

        let max_size = state.max_size;
        state.evict_to(max_size);
        lease
    }

    /// Evict unreferenced entries until the cache holds at most `target_size` bytes.
    pub fn trim(&self, target_size: usize) -> usize {
        lock(&self.state).evict_to(target_size)
    }

    /// Drop every unreferenced entry.
    pub fn clear(&self) -> usize {
        self.trim(0)
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let state = lock(&self.state);
        let (referenced_entries, referenced_size) = state
            .lru
            .iter()
            .filter(|(_, e)| e.refs > 0)
            .fold((0, 0), |(n, size), (_, e)| (n + 1, size + e.size));
        MemoryCacheStats {
            entries: state.lru.len(),
            size: state.current_size,
            max_size: state.max_size,
            referenced_entries,
            referenced_size,
            hits: state.hits,
            misses: state.misses,
        }
    }

    /// Current reference count of `key`, if cached.
    pub fn reference_count(&self, key: &RequestKey) -> Option<usize> {
        lock(&self.state).lru.peek(key).map(|e| e.refs)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Point-in-time counters of a [`MemoryCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub size: usize,
    pub max_size: usize,
    pub referenced_entries: usize,
    pub referenced_size: usize,
    pub hits: u64,
    pub misses: u64,
}

// =============================================================================
// MemoryLease
// =============================================================================

/// A counted reference on a memory cache entry.
///
/// Dropping the lease releases the reference. The lease does not keep the
/// cache alive; releasing after the cache is gone is a no-op.
pub struct MemoryLease {
    key: RequestKey,
    generation: u64,
    image: Arc<CachedImage>,
    state: Weak<Mutex<State>>,
}

impl MemoryLease {
    pub fn image(&self) -> &Arc<CachedImage> {
        &self.image
    }

    pub fn bitmap(&self) -> &Arc<Bitmap> {
        &self.image.bitmap
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Release the reference now.
    pub fn release(self) {}
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).release(&self.key, self.generation);
        }
    }
}

impl fmt::Debug for MemoryLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLease")
            .field("key", &self.key)
            .field("bitmap", &self.image.bitmap)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
