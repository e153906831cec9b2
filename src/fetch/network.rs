use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use tracing::debug;

use super::{normalize_mime, DataFrom, DataSource, FetchResult, Fetcher, FetcherFactory};
use crate::error::{HttpError, LoadError};
use crate::http::HttpStack;
use crate::request::ImageRequest;

/// Map a non-success HTTP status to a typed failure.
pub fn map_status(uri: &str, status: StatusCode) -> LoadError {
    let uri = uri.to_string();
    match status.as_u16() {
        404 | 410 => LoadError::SourceNotFound { uri },
        408 | 429 => LoadError::TransientNetwork {
            uri,
            message: format!("HTTP {status}"),
        },
        code if status.is_server_error() => LoadError::ServerError { uri, status: code },
        code => LoadError::HttpStatus { uri, status: code },
    }
}

fn map_transport_error(uri: &str, err: HttpError) -> LoadError {
    match err {
        HttpError::InvalidUrl(reason) => LoadError::InvalidUri {
            uri: uri.to_string(),
            reason,
        },
        other => LoadError::TransientNetwork {
            uri: uri.to_string(),
            message: other.to_string(),
        },
    }
}

/// Fetches `http://` and `https://` URIs through an [`HttpStack`].
///
/// The body is returned as a stream; nothing is buffered here.
pub struct HttpFetcher {
    stack: Arc<dyn HttpStack>,
    uri: String,
    headers: HeaderMap,
}

impl HttpFetcher {
    pub fn new(stack: Arc<dyn HttpStack>, uri: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            stack,
            uri: uri.into(),
            headers,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self) -> Result<FetchResult, LoadError> {
        debug!(uri = %self.uri, "Issuing HTTP GET");
        let response = self
            .stack
            .get_response(&self.uri, &self.headers)
            .await
            .map_err(|e| map_transport_error(&self.uri, e))?;

        if !response.status().is_success() {
            return Err(map_status(&self.uri, response.status()));
        }

        let content_length = response.content_length();
        let mime_type = response.content_type().map(normalize_mime);
        let source = DataSource::Stream {
            body: response.into_stream(),
            content_length,
        };
        Ok(FetchResult::new(source, DataFrom::Network).with_mime_type(mime_type))
    }
}

/// Matches requests whose scheme is `http` or `https`.
pub struct HttpFetcherFactory {
    stack: Arc<dyn HttpStack>,
}

impl HttpFetcherFactory {
    pub fn new(stack: Arc<dyn HttpStack>) -> Self {
        Self { stack }
    }
}

impl FetcherFactory for HttpFetcherFactory {
    fn name(&self) -> &'static str {
        "HttpFetcher"
    }

    fn create(&self, request: &ImageRequest) -> Option<Box<dyn Fetcher>> {
        request.is_network().then(|| {
            Box::new(HttpFetcher::new(
                self.stack.clone(),
                request.uri(),
                request.http_headers().clone(),
            )) as Box<dyn Fetcher>
        })
    }
}
