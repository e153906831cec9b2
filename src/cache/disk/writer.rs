use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::DiskInner;
use crate::error::CacheError;

/// Staged write of one disk cache entry.
///
/// Bytes go to a private tmp file. [`commit`](Self::commit) syncs it and
/// renames it into place; dropping the writer without committing deletes
/// the tmp file and leaves any previous entry visible.
pub struct DiskCacheWriter {
    inner: Arc<DiskInner>,
    key: String,
    tmp_path: PathBuf,
    file: Option<File>,
    written: u64,
    committed: bool,
}

impl DiskCacheWriter {
    pub(super) fn new(inner: Arc<DiskInner>, key: String, tmp_path: PathBuf, file: File) -> Self {
        Self {
            inner,
            key,
            tmp_path,
            file: Some(file),
            written: 0,
            committed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes staged so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub(crate) fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Append `chunk` to the staged payload.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), CacheError> {
        let size = self.written + chunk.len() as u64;
        if size > self.inner.max_size {
            return Err(CacheError::EntryTooLarge {
                size,
                capacity: self.inner.max_size,
            });
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CacheError::Corrupt("writer already closed".to_string()))?;
        file.write_all(chunk)
            .await
            .map_err(|e| CacheError::io("write", e))?;
        self.written = size;
        Ok(())
    }

    /// Make the staged payload the visible entry for the key.
    ///
    /// Returns the committed size. Commit may evict older entries.
    pub async fn commit(mut self) -> Result<u64, CacheError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| CacheError::Corrupt("writer already closed".to_string()))?;
        file.flush().await.map_err(|e| CacheError::io("flush", e))?;
        file.sync_all().await.map_err(|e| CacheError::io("sync", e))?;
        drop(file);

        self.inner
            .commit_staged(&self.key, &self.tmp_path, self.written)?;
        self.committed = true;
        debug!(key = %self.key, size = self.written, "Committed disk cache entry");
        Ok(self.written)
    }

    /// Discard the staged payload.
    pub fn abort(self) {}
}

impl Drop for DiskCacheWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close before unlinking so the handle does not outlive the file on any platform
        self.file.take();
        match std::fs::remove_file(&self.tmp_path) {
            Ok(()) => debug!(key = %self.key, "Discarded staged disk cache entry"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.tmp_path.display(),
                error = %e,
                "Failed to remove staged cache file"
            ),
        }
    }
}

impl fmt::Debug for DiskCacheWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCacheWriter")
            .field("key", &self.key)
            .field("tmp_path", &self.tmp_path)
            .field("written", &self.written)
            .finish()
    }
}
