//! Single-owner lock on a cache directory.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;

pub(crate) const LOCK_FILE_NAME: &str = "cache.lock";

#[derive(Debug, Serialize, Deserialize)]
struct LockFileContents {
    pid: u32,
    started_at: u64,
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `Some(false)` only when the process is known to be gone.
#[cfg(unix)]
fn pid_is_alive(pid: u32) -> Option<bool> {
    // kill(0) targets the whole process group
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }

    // SAFETY: signal 0 performs error checking without sending a signal.
    let result = unsafe { libc::kill(pid as i32, 0) };
    if result == 0 {
        return Some(true);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(code) if code == libc::ESRCH => Some(false),
        Some(code) if code == libc::EPERM => Some(true),
        _ => None,
    }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> Option<bool> {
    None
}

/// Held for the lifetime of a [`DiskCache`](super::DiskCache); removes the
/// lock file on drop.
#[derive(Debug)]
pub(crate) struct DirectoryLock {
    path: PathBuf,
}

impl DirectoryLock {
    /// Take the lock on `dir`, reclaiming it if the recorded owner is dead.
    pub(crate) fn acquire(dir: &Path) -> Result<Self, CacheError> {
        let path = dir.join(LOCK_FILE_NAME);

        // Second attempt only after removing a stale lock
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let contents = LockFileContents {
                        pid: std::process::id(),
                        started_at: now_seconds(),
                    };
                    let serialized = serde_json::to_vec(&contents)
                        .map_err(|e| CacheError::Corrupt(e.to_string()))?;
                    file.write_all(&serialized)
                        .and_then(|_| file.sync_all())
                        .map_err(|e| CacheError::io("lock", e))?;
                    debug!(path = %path.display(), "Acquired cache directory lock");
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    let owner = fs::read(&path)
                        .ok()
                        .and_then(|bytes| serde_json::from_slice::<LockFileContents>(&bytes).ok());

                    match owner {
                        Some(owner) if pid_is_alive(owner.pid) != Some(false) => {
                            return Err(CacheError::Locked {
                                path: dir.to_path_buf(),
                                pid: owner.pid,
                            });
                        }
                        Some(owner) => {
                            warn!(pid = owner.pid, "Reclaiming cache lock from dead process");
                        }
                        None => {
                            warn!(path = %path.display(), "Reclaiming unreadable cache lock");
                        }
                    }
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(CacheError::io("lock", e)),
                    }
                }
                Err(err) => return Err(CacheError::io("lock", err)),
            }
        }

        Err(CacheError::io(
            "lock",
            std::io::Error::new(ErrorKind::AlreadyExists, "lock file reappeared"),
        ))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove cache lock");
            }
        }
    }
}
