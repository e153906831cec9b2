use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{map_open_error, mime_from_path, DataFrom, DataSource, FetchResult, Fetcher, FetcherFactory};
use crate::error::LoadError;
use crate::request::ImageRequest;

const ASSET_SCHEME_PREFIX: &str = "asset://";

/// Reads bundled assets, `asset://<relative path>`, below a fixed root.
pub struct AssetFetcher {
    uri: String,
    path: PathBuf,
}

impl AssetFetcher {
    /// Resolve `uri` against `root`, rejecting anything that escapes it.
    pub fn resolve(root: &Path, uri: &str) -> Result<Self, LoadError> {
        let relative = uri
            .get(ASSET_SCHEME_PREFIX.len()..)
            .filter(|_| uri[..ASSET_SCHEME_PREFIX.len()].eq_ignore_ascii_case(ASSET_SCHEME_PREFIX))
            .ok_or_else(|| LoadError::InvalidUri {
                uri: uri.to_string(),
                reason: "not an asset URI".to_string(),
            })?;

        let relative = Path::new(relative);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if relative.as_os_str().is_empty() || !safe {
            return Err(LoadError::InvalidUri {
                uri: uri.to_string(),
                reason: "asset path must be relative and stay inside the asset root".to_string(),
            });
        }

        Ok(Self {
            uri: uri.to_string(),
            path: root.join(relative),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Fetcher for AssetFetcher {
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

/// Fails the fetch with the resolution error instead of falling through.
struct RejectedAsset(LoadError);

#[async_trait]
impl Fetcher for RejectedAsset {
    async fn fetch(&self) -> Result<FetchResult, LoadError> {
        Err(self.0.clone())
    }
}

/// Matches `asset://` URIs.
#[derive(Debug, Clone)]
pub struct AssetFetcherFactory {
    root: PathBuf,
}

impl AssetFetcherFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FetcherFactory for AssetFetcherFactory {
    fn name(&self) -> &'static str {
        "AssetFetcher"
    }

    fn create(&self, request: &ImageRequest) -> Option<Box<dyn Fetcher>> {
        if request.scheme().as_deref() != Some("asset") {
            return None;
        }
        Some(match AssetFetcher::resolve(&self.root, request.uri()) {
            Ok(fetcher) => Box::new(fetcher),
            Err(err) => Box::new(RejectedAsset(err)),
        })
    }
}
