//! [`HttpStack`] backed by reqwest.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use http::HeaderMap;

use super::{ByteStream, HttpResponse, HttpStack};
use crate::error::HttpError;

/// Connect, time-to-headers and per-chunk read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7000);

/// Client settings for [`ReqwestHttpStack`].
#[derive(Debug, Clone)]
pub struct HttpStackOptions {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Sent with every request; per-request headers are added on top.
    pub default_headers: HeaderMap,
}

impl Default for HttpStackOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: Some(concat!("pictor/", env!("CARGO_PKG_VERSION")).to_string()),
            default_headers: HeaderMap::new(),
        }
    }
}

/// Streams response bodies from a shared reqwest client.
///
/// The timeout bounds connecting, receiving headers, and the gap between two
/// body chunks. A slow but steady download is never cut off.
#[derive(Debug, Clone)]
pub struct ReqwestHttpStack {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpStack {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_options(HttpStackOptions::default())
    }

    pub fn with_options(options: HttpStackOptions) -> Result<Self, HttpError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(options.timeout)
            .default_headers(options.default_headers);
        if let Some(user_agent) = options.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            timeout: options.timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_error(&self, err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::Timeout(self.timeout.as_millis() as u64)
        } else if err.is_connect() {
            HttpError::Connect(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidUrl(err.to_string())
        } else {
            HttpError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl HttpStack for ReqwestHttpStack {
    async fn get_response(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, HttpError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| HttpError::InvalidUrl(format!("{url}: {e}")))?;

        let pending = self.client.get(parsed).headers(headers.clone()).send();
        let response = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| HttpError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let timeout = self.timeout;

        let chunks = response.bytes_stream().boxed();
        let body = stream::unfold(chunks, move |mut chunks| async move {
            match tokio::time::timeout(timeout, chunks.next()).await {
                Ok(Some(Ok(bytes))) => Some((Ok(bytes), chunks)),
                Ok(Some(Err(e))) => Some((Err(io::Error::new(io::ErrorKind::Other, e)), chunks)),
                Ok(None) => None,
                Err(_) => Some((
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data for {} ms", timeout.as_millis()),
                    )),
                    chunks,
                )),
            }
        });
        let body: ByteStream = Box::pin(body);

        Ok(HttpResponse::new(status, response_headers, body))
    }
}
