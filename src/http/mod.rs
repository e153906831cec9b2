//! HTTP transport contract.
//!
//! The network fetcher talks to origins only through [`HttpStack`]. A stack
//! issues a GET and hands back an [`HttpResponse`] whose body is a stream of
//! chunks, so large payloads reach the disk cache writer without being
//! buffered whole.
//!
//! ```text
//! HttpFetcher ──get_response(url, headers)──► HttpStack (ReqwestHttpStack, mocks)
//!      ◄── HttpResponse { status, headers, content_length, body: ByteStream }
//! ```

mod reqwest_stack;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::stream;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};

use crate::error::HttpError;

pub use reqwest_stack::{HttpStackOptions, ReqwestHttpStack, DEFAULT_TIMEOUT};

/// A boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Transport used by the network fetcher.
#[async_trait]
pub trait HttpStack: Send + Sync {
    /// Issue a GET for `url` with the given extra headers.
    ///
    /// Connection failures are returned as [`HttpError`]; any HTTP status,
    /// including errors, is a successful response.
    async fn get_response(&self, url: &str, headers: &HeaderMap)
        -> Result<HttpResponse, HttpError>;
}

// =============================================================================
// HttpResponse
// =============================================================================

/// Response headers plus a streaming body.
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ByteStream,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response with an in-memory body. `Content-Length` is set from the body.
    pub fn from_bytes(status: StatusCode, content_type: Option<&str>, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, body.len().into());
        if let Some(content_type) = content_type.and_then(|v| v.parse().ok()) {
            headers.insert(CONTENT_TYPE, content_type);
        }
        let body: ByteStream = Box::pin(stream::once(async move { Ok(body) }));
        Self::new(status, headers, body)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Reason phrase for the status, empty when unknown.
    pub fn message(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Declared body length; `None` when absent or unparsable.
    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    /// First value of header `name` (case-insensitive), if valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_stream(self) -> ByteStream {
        self.body
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
