//! Durable, size-bounded LRU store of raw bytes.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   cache.lock          owning process id
//!   index.jsonl         journal of insert/touch/remove records
//!   <sha256(key)>       one payload file per key
//!   <sha256(key)>.<pid>-<n>.tmp   staged writes
//! ```
//!
//! # Atomicity
//!
//! Writers stage into a tmp file and rename it over the payload on commit.
//! A reader holds an open handle, so it keeps seeing the payload it opened
//! even if the entry is replaced or evicted afterwards.
//!
//! # Startup
//!
//! Opening replays the journal, drops entries whose payload is missing or has
//! the wrong length, deletes orphan payloads and stale tmp files, rewrites the
//! journal and evicts down to capacity.

mod index;
mod lock;
mod writer;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use index::{IndexEntry, Journal, JournalRecord, INDEX_FILE_NAME};
use lock::{DirectoryLock, LOCK_FILE_NAME};

pub use writer::DiskCacheWriter;

/// Default capacity: 256MB
pub const DEFAULT_DISK_CACHE_CAPACITY: u64 = 256 * 1024 * 1024;

/// Journal records tolerated before compaction, at minimum
const COMPACT_MIN_RECORDS: usize = 1024;

/// Payload file name for `key`.
fn payload_file_name(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn is_payload_file_name(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

// =============================================================================
// State
// =============================================================================

struct DiskState {
    entries: LruCache<String, IndexEntry>,
    total_size: u64,
    clock: u64,
    journal: Journal,
    hits: u64,
    misses: u64,
}

impl DiskState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn record(&mut self, record: JournalRecord) {
        if let Err(e) = self.journal.append(&record) {
            warn!(error = %e, "Failed to append cache index record");
        }
    }

    fn maybe_compact(&mut self) {
        let threshold = COMPACT_MIN_RECORDS.max(self.entries.len() * 4);
        if self.journal.records() <= threshold {
            return;
        }
        let entries = self.entries.iter().rev();
        if let Err(e) = self.journal.compact(entries) {
            warn!(error = %e, "Failed to compact cache index");
        } else {
            debug!(entries = self.entries.len(), "Compacted cache index");
        }
    }

    fn drop_entry(&mut self, dir: &Path, key: &str) -> bool {
        let Some(entry) = self.entries.pop(key) else {
            return false;
        };
        self.total_size = self.total_size.saturating_sub(entry.size);
        remove_payload(&dir.join(&entry.file));
        self.record(JournalRecord::Remove {
            key: key.to_string(),
        });
        true
    }

    /// Evict least recently used entries until `total_size <= target`.
    fn evict_to(&mut self, dir: &Path, target: u64) -> usize {
        let mut evicted = 0;
        while self.total_size > target {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_size = self.total_size.saturating_sub(entry.size);
            remove_payload(&dir.join(&entry.file));
            debug!(key = %key, size = entry.size, "Evicted disk cache entry");
            self.record(JournalRecord::Remove { key });
            evicted += 1;
        }
        evicted
    }
}

fn remove_payload(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache payload"),
    }
}

pub(crate) struct DiskInner {
    dir: PathBuf,
    max_size: u64,
    state: Mutex<DiskState>,
    nonce: AtomicU64,
    _lock: DirectoryLock,
}

impl DiskInner {
    fn state(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rename a staged payload into place and index it.
    pub(super) fn commit_staged(
        &self,
        key: &str,
        tmp_path: &Path,
        size: u64,
    ) -> Result<(), CacheError> {
        if size > self.max_size {
            return Err(CacheError::EntryTooLarge {
                size,
                capacity: self.max_size,
            });
        }
        let file = payload_file_name(key);

        let mut state = self.state();
        fs::rename(tmp_path, self.dir.join(&file)).map_err(|e| CacheError::io("commit", e))?;

        if let Some(old) = state.entries.pop(key) {
            state.total_size = state.total_size.saturating_sub(old.size);
        }
        let accessed = state.tick();
        state.entries.put(
            key.to_string(),
            IndexEntry {
                file: file.clone(),
                size,
                accessed,
            },
        );
        state.total_size += size;
        state.record(JournalRecord::Insert {
            key: key.to_string(),
            file,
            size,
            accessed,
        });

        let evicted = state.evict_to(&self.dir, self.max_size);
        if evicted > 0 {
            debug!(evicted, total_size = state.total_size, "Disk cache over capacity after commit");
        }
        state.maybe_compact();
        Ok(())
    }
}

// =============================================================================
// DiskCache
// =============================================================================

/// Size-bounded LRU byte store backed by a directory.
///
/// Cloning is cheap; clones share the same directory and index. Only one
/// `DiskCache` per directory may be open at a time, across processes.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<DiskInner>,
}

impl DiskCache {
    /// Open (or create) the cache rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, max_size: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::io("create_dir", e))?;
        let lock = DirectoryLock::acquire(&dir)?;

        let replay = index::replay(&dir).map_err(|e| CacheError::io("replay", e))?;

        let mut entries = LruCache::unbounded();
        let mut total_size = 0;
        let mut clock = 0;
        let mut dropped = 0;
        for (key, entry) in replay.entries {
            clock = clock.max(entry.accessed);
            let valid = is_payload_file_name(&entry.file)
                && fs::metadata(dir.join(&entry.file))
                    .map(|meta| meta.is_file() && meta.len() == entry.size)
                    .unwrap_or(false);
            if !valid {
                warn!(key = %key, file = %entry.file, "Dropping cache entry with missing or corrupt payload");
                dropped += 1;
                continue;
            }
            total_size += entry.size;
            entries.put(key, entry);
        }

        let live: HashSet<&str> = entries.iter().map(|(_, e)| e.file.as_str()).collect();
        let mut orphans = 0;
        let listing = fs::read_dir(&dir).map_err(|e| CacheError::io("scan", e))?;
        for item in listing {
            let item = item.map_err(|e| CacheError::io("scan", e))?;
            let name = item.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name == LOCK_FILE_NAME || name == INDEX_FILE_NAME {
                continue;
            }
            if name.ends_with(".tmp") || (is_payload_file_name(name) && !live.contains(name)) {
                remove_payload(&item.path());
                orphans += 1;
            }
        }
        drop(live);

        // `iter()` runs most recent first; the journal wants oldest first
        let journal = Journal::create(&dir, entries.iter().rev())
            .map_err(|e| CacheError::io("compact", e))?;

        let mut state = DiskState {
            entries,
            total_size,
            clock,
            journal,
            hits: 0,
            misses: 0,
        };
        let evicted = state.evict_to(&dir, max_size);

        info!(
            dir = %dir.display(),
            entries = state.entries.len(),
            size = state.total_size,
            max_size,
            dropped,
            orphans,
            evicted,
            skipped_records = replay.skipped,
            "Opened disk cache"
        );

        Ok(Self {
            inner: Arc::new(DiskInner {
                dir,
                max_size,
                state: Mutex::new(state),
                nonce: AtomicU64::new(0),
                _lock: lock,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    /// Open a read-only handle on the entry for `key`, marking it most
    /// recently used. A payload that vanished from disk is a miss.
    pub fn get(&self, key: &str) -> Option<DiskSnapshot> {
        let mut state = self.inner.state();
        let Some(entry) = state.entries.get(key) else {
            state.misses += 1;
            return None;
        };
        let path = self.inner.dir.join(&entry.file);
        let size = entry.size;

        match fs::File::open(&path) {
            Ok(file) => {
                let accessed = state.tick();
                if let Some(entry) = state.entries.peek_mut(key) {
                    entry.accessed = accessed;
                }
                state.record(JournalRecord::Touch {
                    key: key.to_string(),
                    accessed,
                });
                state.hits += 1;
                state.maybe_compact();
                Some(DiskSnapshot {
                    key: key.to_string(),
                    path,
                    size,
                    file: tokio::fs::File::from_std(file),
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache payload unreadable, dropping entry");
                state.drop_entry(&self.inner.dir, key);
                state.misses += 1;
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.state().entries.contains(key)
    }

    /// Start a staged write for `key`.
    pub async fn put(&self, key: &str) -> Result<DiskCacheWriter, CacheError> {
        let nonce = self.inner.nonce.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.inner.dir.join(format!(
            "{}.{}-{}.tmp",
            payload_file_name(key),
            std::process::id(),
            nonce
        ));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await
            .map_err(|e| CacheError::io("stage", e))?;
        Ok(DiskCacheWriter::new(
            self.inner.clone(),
            key.to_string(),
            tmp_path,
            file,
        ))
    }

    /// Write `bytes` as the entry for `key` in one step.
    pub async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<u64, CacheError> {
        let mut writer = self.put(key).await?;
        writer.write(bytes).await?;
        writer.commit().await
    }

    /// Remove the entry for `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.inner.state();
        state.drop_entry(&self.inner.dir, key)
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut state = self.inner.state();
        let count = state.entries.len();
        while let Some((_, entry)) = state.entries.pop_lru() {
            remove_payload(&self.inner.dir.join(&entry.file));
        }
        state.total_size = 0;
        state
            .journal
            .compact(std::iter::empty())
            .map_err(|e| CacheError::io("clear", e))?;
        info!(dir = %self.inner.dir.display(), count, "Cleared disk cache");
        Ok(count)
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        let state = self.inner.state();
        state.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    pub fn stats(&self) -> DiskCacheStats {
        let state = self.inner.state();
        DiskCacheStats {
            entries: state.entries.len(),
            size: state.total_size,
            max_size: self.inner.max_size,
            hits: state.hits,
            misses: state.misses,
            journal_records: state.journal.records(),
        }
    }
}

impl fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.inner.dir)
            .field("max_size", &self.inner.max_size)
            .finish()
    }
}

/// Point-in-time counters of a [`DiskCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskCacheStats {
    pub entries: usize,
    pub size: u64,
    pub max_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub journal_records: usize,
}

// =============================================================================
// DiskSnapshot
// =============================================================================

/// Read-only handle on a committed payload.
#[derive(Debug)]
pub struct DiskSnapshot {
    key: String,
    path: PathBuf,
    size: u64,
    file: tokio::fs::File,
}

impl DiskSnapshot {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the whole payload. A length mismatch is reported as `InvalidData`.
    pub async fn read_all(mut self) -> io::Result<Bytes> {
        let mut buffer = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut buffer).await?;
        if buffer.len() as u64 != self.size {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "cache payload for {} has {} bytes, index says {}",
                    self.key,
                    buffer.len(),
                    self.size
                ),
            ));
        }
        Ok(Bytes::from(buffer))
    }
}
