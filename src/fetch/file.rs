use std::path::{Path, PathBuf};

use async_trait::async_trait;
use url::Url;

use super::{map_open_error, mime_from_path, DataFrom, DataSource, FetchResult, Fetcher, FetcherFactory};
use crate::error::LoadError;
use crate::request::ImageRequest;

/// Reads a local file given as `file://` URI or absolute path.
pub struct FileFetcher {
    uri: String,
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(uri: impl Into<String>, path: PathBuf) -> Self {
        Self {
            uri: uri.into(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self) -> Result<FetchResult, LoadError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| map_open_error(&self.uri, e))?;
        if !metadata.is_file() {
            return Err(LoadError::SourceNotFound {
                uri: self.uri.clone(),
            });
        }

        let source = DataSource::File {
            path: self.path.clone(),
            size: metadata.len(),
        };
        Ok(FetchResult::new(source, DataFrom::Local).with_mime_type(mime_from_path(&self.path)))
    }
}

/// Matches `file://` URIs and bare absolute paths.
#[derive(Debug, Default)]
pub struct FileFetcherFactory;

impl FileFetcherFactory {
    fn resolve(request: &ImageRequest) -> Option<PathBuf> {
        match request.scheme().as_deref() {
            Some("file") => Url::parse(request.uri()).ok()?.to_file_path().ok(),
            None => {
                let path = Path::new(request.uri());
                path.is_absolute().then(|| path.to_path_buf())
            }
            Some(_) => None,
        }
    }
}

impl FetcherFactory for FileFetcherFactory {
    fn name(&self) -> &'static str {
        "FileFetcher"
    }

    fn create(&self, request: &ImageRequest) -> Option<Box<dyn Fetcher>> {
        let path = Self::resolve(request)?;
        Some(Box::new(FileFetcher::new(request.uri(), path)))
    }
}
