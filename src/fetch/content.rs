use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{DataFrom, DataSource, FetchResult, Fetcher, FetcherFactory};
use crate::error::LoadError;
use crate::request::ImageRequest;

/// Host-provided access to `content://` resources.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    /// Open the resource behind `uri`; `Ok(None)` when it does not exist.
    async fn open(&self, uri: &str) -> io::Result<Option<Bytes>>;

    /// Mime type of the resource, if the host knows it.
    fn mime_type(&self, _uri: &str) -> Option<String> {
        None
    }
}

/// Loads a `content://` URI through a [`ContentResolver`].
pub struct ContentFetcher {
    resolver: Arc<dyn ContentResolver>,
    uri: String,
}

impl ContentFetcher {
    pub fn new(resolver: Arc<dyn ContentResolver>, uri: impl Into<String>) -> Self {
        Self {
            resolver,
            uri: uri.into(),
        }
    }
}

#[async_trait]
impl Fetcher for ContentFetcher {
    async fn fetch(&self) -> Result<FetchResult, LoadError> {
        let bytes = self
            .resolver
            .open(&self.uri)
            .await
            .map_err(|e| super::map_open_error(&self.uri, e))?
            .ok_or_else(|| LoadError::SourceNotFound {
                uri: self.uri.clone(),
            })?;

        Ok(FetchResult::new(DataSource::Bytes(bytes), DataFrom::Local)
            .with_mime_type(self.resolver.mime_type(&self.uri)))
    }
}

/// Matches `content://` URIs.
pub struct ContentFetcherFactory {
    resolver: Arc<dyn ContentResolver>,
}

impl ContentFetcherFactory {
    pub fn new(resolver: Arc<dyn ContentResolver>) -> Self {
        Self { resolver }
    }
}

impl FetcherFactory for ContentFetcherFactory {
    fn name(&self) -> &'static str {
        "ContentFetcher"
    }

    fn create(&self, request: &ImageRequest) -> Option<Box<dyn Fetcher>> {
        (request.scheme().as_deref() == Some("content"))
            .then(|| Box::new(ContentFetcher::new(self.resolver.clone(), request.uri())) as Box<dyn Fetcher>)
    }
}
