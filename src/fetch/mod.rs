//! Fetchers turn a request's URI into a byte source.
//!
//! Each source kind (network, local file, asset, content resource, in-memory
//! blob) is one [`Fetcher`] variant, created by a [`FetcherFactory`] that
//! inspects the request. The [`ComponentRegistry`](crate::components::ComponentRegistry)
//! asks factories in order and takes the first match.
//!
//! ```text
//! ImageRequest ─► [HttpFetcherFactory, FileFetcherFactory, AssetFetcherFactory,
//!                  ContentFetcherFactory, DataUriFetcherFactory] ─► Fetcher
//!                                                                     │
//!                                        FetchResult { DataSource, DataFrom } ◄┘
//! ```

mod asset;
mod content;
mod data_uri;
mod file;
mod network;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::cache::DiskSnapshot;
use crate::error::LoadError;
use crate::http::ByteStream;
use crate::request::ImageRequest;

pub use asset::{AssetFetcher, AssetFetcherFactory};
pub use content::{ContentFetcher, ContentFetcherFactory, ContentResolver};
pub use data_uri::{DataUriFetcher, DataUriFetcherFactory};
pub use file::{FileFetcher, FileFetcherFactory};
pub use network::{map_status, HttpFetcher, HttpFetcherFactory};

// =============================================================================
// DataFrom
// =============================================================================

/// Where the bytes (or the decoded result) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFrom {
    Network,
    DownloadCache,
    ResultCache,
    MemoryCache,
    Local,
    Memory,
}

impl DataFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFrom::Network => "NETWORK",
            DataFrom::DownloadCache => "DOWNLOAD_CACHE",
            DataFrom::ResultCache => "RESULT_CACHE",
            DataFrom::MemoryCache => "MEMORY_CACHE",
            DataFrom::Local => "LOCAL",
            DataFrom::Memory => "MEMORY",
        }
    }
}

impl fmt::Display for DataFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DataSource
// =============================================================================

/// A readable byte source handed from a fetcher to a decoder.
pub enum DataSource {
    /// Streaming body, not yet read
    Stream {
        body: ByteStream,
        content_length: Option<u64>,
    },
    /// Bytes already in memory
    Bytes(Bytes),
    /// A local file
    File { path: PathBuf, size: u64 },
    /// A read-only handle on a committed disk cache entry
    DiskCache(DiskSnapshot),
}

impl DataSource {
    /// Size in bytes when known up front.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            DataSource::Stream { content_length, .. } => *content_length,
            DataSource::Bytes(bytes) => Some(bytes.len() as u64),
            DataSource::File { size, .. } => Some(*size),
            DataSource::DiskCache(snapshot) => Some(snapshot.size()),
        }
    }

    /// Read the whole source into memory.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            DataSource::Stream {
                mut body,
                content_length,
            } => {
                let capacity = content_length.unwrap_or(0).min(64 * 1024 * 1024) as usize;
                let mut buffer = BytesMut::with_capacity(capacity);
                while let Some(chunk) = body.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
            DataSource::Bytes(bytes) => Ok(bytes),
            DataSource::File { path, .. } => tokio::fs::read(&path).await.map(Bytes::from),
            DataSource::DiskCache(snapshot) => snapshot.read_all().await,
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Stream { content_length, .. } => f
                .debug_struct("Stream")
                .field("content_length", content_length)
                .finish_non_exhaustive(),
            DataSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            DataSource::File { path, size } => f
                .debug_struct("File")
                .field("path", path)
                .field("size", size)
                .finish(),
            DataSource::DiskCache(snapshot) => f.debug_tuple("DiskCache").field(snapshot).finish(),
        }
    }
}

/// Output of a fetcher.
#[derive(Debug)]
pub struct FetchResult {
    pub source: DataSource,
    pub data_from: DataFrom,
    pub mime_type: Option<String>,
}

impl FetchResult {
    pub fn new(source: DataSource, data_from: DataFrom) -> Self {
        Self {
            source,
            data_from,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Retrieves the bytes for one request.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<FetchResult, LoadError>;
}

/// Creates a [`Fetcher`] for requests it understands.
pub trait FetcherFactory: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Return a fetcher bound to `request`, or `None` to let the next factory try.
    fn create(&self, request: &ImageRequest) -> Option<Box<dyn Fetcher>>;
}

// =============================================================================
// Helpers
// =============================================================================

/// Guess a mime type from a file extension.
pub(crate) fn mime_from_path(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Mime type without parameters, lower-cased.
pub(crate) fn normalize_mime(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_ascii_lowercase()
}

/// Map a local I/O failure while opening a source.
pub(crate) fn map_open_error(uri: &str, err: io::Error) -> LoadError {
    match err.kind() {
        io::ErrorKind::NotFound => LoadError::SourceNotFound {
            uri: uri.to_string(),
        },
        _ => LoadError::Internal(format!("open {uri}: {err}")),
    }
}
