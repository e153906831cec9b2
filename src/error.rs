use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a load request.
///
/// Every variant is `Clone` so one failure can be delivered to all callers
/// joined on the same in-flight execution.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The source does not exist (HTTP 404/410, missing file, unknown asset)
    #[error("Source not found: {uri}")]
    SourceNotFound { uri: String },

    /// Connection, timeout or throttling failure; the caller may retry
    #[error("Transient network error for {uri}: {message}")]
    TransientNetwork { uri: String, message: String },

    /// The origin answered with a 5xx status
    #[error("Server error {status} for {uri}")]
    ServerError { uri: String, status: u16 },

    /// The origin answered with a non-success status that is neither 404 nor 5xx
    #[error("Unexpected HTTP status {status} for {uri}")]
    HttpStatus { uri: String, status: u16 },

    /// The bytes were recognized but the codec is not available
    #[error("Unsupported image format: {0}")]
    DecodeUnsupported(String),

    /// The bytes could not be decoded
    #[error("Malformed image data: {0}")]
    DecodeMalformed(String),

    /// No fetcher or decoder variant accepted the request
    #[error("No {kind} can handle {subject}")]
    NoMatchingHandler { kind: &'static str, subject: String },

    /// The request's depth forbids reaching the source it would need
    #[error("Request depth {depth} does not allow loading {uri}")]
    DepthLimited { uri: String, depth: String },

    /// The URI could not be parsed or is not allowed
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The decode options are inconsistent with the image
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A worker task panicked or was lost
    #[error("Internal error: {0}")]
    Internal(String),

    /// The execution was cancelled; never delivered to a target
    #[error("Request cancelled")]
    Cancelled,
}

impl LoadError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadError::TransientNetwork { .. } | LoadError::ServerError { .. }
        )
    }

    /// Short machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LoadError::SourceNotFound { .. } => "source_not_found",
            LoadError::TransientNetwork { .. } => "transient_network",
            LoadError::ServerError { .. } => "server_error",
            LoadError::HttpStatus { .. } => "http_status",
            LoadError::DecodeUnsupported(_) => "decode_unsupported",
            LoadError::DecodeMalformed(_) => "decode_malformed",
            LoadError::NoMatchingHandler { .. } => "no_matching_handler",
            LoadError::DepthLimited { .. } => "depth_limited",
            LoadError::InvalidUri { .. } => "invalid_uri",
            LoadError::InvalidRequest(_) => "invalid_request",
            LoadError::Internal(_) => "internal_error",
            LoadError::Cancelled => "cancelled",
        }
    }
}

/// Disk and memory cache failures.
///
/// The pipeline never fails a request because of these: a read error is a
/// miss and a write error skips the write.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Filesystem error, with the operation that failed
    #[error("Cache I/O error during {op}: {message}")]
    Io { op: &'static str, message: String },

    /// Another live process owns the cache directory
    #[error("Cache directory {path} is locked by process {pid}")]
    Locked { path: PathBuf, pid: u32 },

    /// The entry cannot fit in the cache at all
    #[error("Entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    EntryTooLarge { size: u64, capacity: u64 },

    /// Stored data does not match its index record
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

impl CacheError {
    pub(crate) fn io(op: &'static str, err: std::io::Error) -> Self {
        CacheError::Io {
            op,
            message: err.to_string(),
        }
    }
}

/// Transport-level failures raised by an [`HttpStack`](crate::http::HttpStack).
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// No response (or no body chunk) within the configured timeout
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The URL was rejected by the client
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
