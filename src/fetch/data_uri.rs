use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use bytes::Bytes;

use super::{normalize_mime, DataFrom, DataSource, FetchResult, Fetcher, FetcherFactory};
use crate::error::LoadError;
use crate::request::ImageRequest;

/// Serves an inline `data:[<mime>][;base64],<payload>` URI.
#[derive(Debug)]
pub struct DataUriFetcher {
    uri: String,
}

impl DataUriFetcher {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Split and decode the URI into its mime type and payload.
    pub fn parse(uri: &str) -> Result<(Option<String>, Bytes), LoadError> {
        let invalid = |reason: &str| LoadError::InvalidUri {
            uri: truncate(uri),
            reason: reason.to_string(),
        };

        let rest = uri
            .get(..5)
            .filter(|s| s.eq_ignore_ascii_case("data:"))
            .map(|_| &uri[5..])
            .ok_or_else(|| invalid("missing data: prefix"))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| invalid("missing ',' separator"))?;

        let is_base64 = meta
            .rsplit(';')
            .next()
            .is_some_and(|p| p.eq_ignore_ascii_case("base64"));
        let mime = meta.split(';').next().filter(|m| !m.is_empty()).map(normalize_mime);

        let bytes = if is_base64 {
            let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(&compact)
                .or_else(|_| URL_SAFE.decode(&compact))
                .map_err(|e| invalid(&format!("bad base64 payload: {e}")))?
        } else {
            payload.as_bytes().to_vec()
        };

        Ok((mime, Bytes::from(bytes)))
    }
}

/// Keep error messages readable for multi-megabyte URIs.
fn truncate(uri: &str) -> String {
    match uri.char_indices().nth(64) {
        Some((idx, _)) => format!("{}...", &uri[..idx]),
        None => uri.to_string(),
    }
}

#[async_trait]
impl Fetcher for DataUriFetcher {
    async fn fetch(&self) -> Result<FetchResult, LoadError> {
        let (mime, bytes) = Self::parse(&self.uri)?;
        Ok(FetchResult::new(DataSource::Bytes(bytes), DataFrom::Memory).with_mime_type(mime))
    }
}

/// Matches `data:` URIs.
#[derive(Debug, Default)]
pub struct DataUriFetcherFactory;

impl FetcherFactory for DataUriFetcherFactory {
    fn name(&self) -> &'static str {
        "DataUriFetcher"
    }

    fn create(&self, request: &ImageRequest) -> Option<Box<dyn Fetcher>> {
        (request.scheme().as_deref() == Some("data"))
            .then(|| Box::new(DataUriFetcher::new(request.uri())) as Box<dyn Fetcher>)
    }
}
