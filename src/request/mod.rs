//! Load requests.
//!
//! An [`ImageRequest`] is an immutable value: a source URI, the decode options
//! that shape the output, a cache policy per tier and a depth limit. It is
//! built once with [`ImageRequestBuilder`] and never mutated after submission.
//!
//! ```
//! use pictor::request::{CachePolicy, ImageRequest, Precision, Resize};
//!
//! let request = ImageRequest::builder("https://example.com/photo.jpg")
//!     .resize(Resize::new(200, 200).with_precision(Precision::LessPixels))
//!     .memory_cache_policy(CachePolicy::READ_ONLY)
//!     .build();
//!
//! assert_eq!(
//!     request.key().to_string(),
//!     "https://example.com/photo.jpg _resize=Resize(200x200,LESS_PIXELS,CENTER_CROP)"
//! );
//! ```

mod key;
mod options;
mod policy;

use std::fmt;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

use crate::decode::Transformation;

pub use key::RequestKey;
pub use options::{ColorConfig, DecodeOptions, Precision, Region, Resize, Scale};
pub use policy::{CachePolicy, Depth};

/// Receives download progress for network sources.
pub trait ProgressListener: Send + Sync {
    /// `total` is `None` when the server sent no content length.
    fn on_progress(&self, total: Option<u64>, completed: u64);
}

// =============================================================================
// ImageRequest
// =============================================================================

/// A single image load request.
#[derive(Clone)]
pub struct ImageRequest {
    uri: Arc<str>,
    options: DecodeOptions,
    transformations: Vec<Arc<dyn Transformation>>,
    key: RequestKey,
    memory_cache_policy: CachePolicy,
    result_cache_policy: CachePolicy,
    download_cache_policy: CachePolicy,
    depth: Depth,
    http_headers: HeaderMap,
    progress_listener: Option<Arc<dyn ProgressListener>>,
}

impl ImageRequest {
    /// Request `uri` with default options and every cache tier enabled.
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self::builder(uri).build()
    }

    pub fn builder(uri: impl Into<Arc<str>>) -> ImageRequestBuilder {
        ImageRequestBuilder::new(uri)
    }

    /// Start a builder pre-filled with this request's fields.
    pub fn to_builder(&self) -> ImageRequestBuilder {
        ImageRequestBuilder {
            uri: self.uri.clone(),
            options: self.options,
            transformations: self.transformations.clone(),
            memory_cache_policy: self.memory_cache_policy,
            result_cache_policy: self.result_cache_policy,
            download_cache_policy: self.download_cache_policy,
            depth: self.depth,
            http_headers: self.http_headers.clone(),
            progress_listener: self.progress_listener.clone(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Applied after decoding, in order.
    pub fn transformations(&self) -> &[Arc<dyn Transformation>] {
        &self.transformations
    }

    /// Key of the decoded result (memory and result tiers, coordinator).
    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Key of the raw downloaded bytes: the URI alone.
    pub fn download_key(&self) -> RequestKey {
        RequestKey::from_raw(self.uri.clone())
    }

    pub fn memory_cache_policy(&self) -> CachePolicy {
        self.memory_cache_policy
    }

    pub fn result_cache_policy(&self) -> CachePolicy {
        self.result_cache_policy
    }

    pub fn download_cache_policy(&self) -> CachePolicy {
        self.download_cache_policy
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn http_headers(&self) -> &HeaderMap {
        &self.http_headers
    }

    pub fn progress_listener(&self) -> Option<&Arc<dyn ProgressListener>> {
        self.progress_listener.as_ref()
    }

    /// Scheme of the URI in lower case, `None` for bare paths.
    pub fn scheme(&self) -> Option<String> {
        let (scheme, _) = self.uri.split_once(':')?;
        let valid = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        // A single letter is a Windows drive, not a scheme.
        (valid && scheme.len() > 1).then(|| scheme.to_ascii_lowercase())
    }

    pub fn is_network(&self) -> bool {
        matches!(self.scheme().as_deref(), Some("http") | Some("https"))
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("uri", &self.uri)
            .field("options", &self.options)
            .field("transformations", &self.transformations)
            .field("memory_cache_policy", &self.memory_cache_policy)
            .field("result_cache_policy", &self.result_cache_policy)
            .field("download_cache_policy", &self.download_cache_policy)
            .field("depth", &self.depth)
            .field("http_headers", &self.http_headers)
            .field("progress_listener", &self.progress_listener.is_some())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ImageRequest`].
pub struct ImageRequestBuilder {
    uri: Arc<str>,
    options: DecodeOptions,
    transformations: Vec<Arc<dyn Transformation>>,
    memory_cache_policy: CachePolicy,
    result_cache_policy: CachePolicy,
    download_cache_policy: CachePolicy,
    depth: Depth,
    http_headers: HeaderMap,
    progress_listener: Option<Arc<dyn ProgressListener>>,
}

impl ImageRequestBuilder {
    fn new(uri: impl Into<Arc<str>>) -> Self {
        Self {
            uri: uri.into(),
            options: DecodeOptions::default(),
            transformations: Vec::new(),
            memory_cache_policy: CachePolicy::ENABLED,
            result_cache_policy: CachePolicy::ENABLED,
            download_cache_policy: CachePolicy::ENABLED,
            depth: Depth::Network,
            http_headers: HeaderMap::new(),
            progress_listener: None,
        }
    }

    pub fn resize(mut self, resize: Resize) -> Self {
        self.options.resize = Some(resize);
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.options.region = Some(region);
        self
    }

    pub fn color(mut self, color: ColorConfig) -> Self {
        self.options.color = color;
        self
    }

    pub fn ignore_exif_orientation(mut self, ignore: bool) -> Self {
        self.options.ignore_exif_orientation = ignore;
        self
    }

    pub fn options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Append `transformation` to the chain run after decoding.
    pub fn transformation(mut self, transformation: impl Transformation + 'static) -> Self {
        self.transformations.push(Arc::new(transformation));
        self
    }

    pub fn transformations(mut self, transformations: Vec<Arc<dyn Transformation>>) -> Self {
        self.transformations = transformations;
        self
    }

    pub fn memory_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.memory_cache_policy = policy;
        self
    }

    pub fn result_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.result_cache_policy = policy;
        self
    }

    pub fn download_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.download_cache_policy = policy;
        self
    }

    /// Skip every cache read but still write fresh results.
    pub fn force_refresh(self) -> Self {
        self.memory_cache_policy(CachePolicy::WRITE_ONLY)
            .result_cache_policy(CachePolicy::WRITE_ONLY)
            .download_cache_policy(CachePolicy::WRITE_ONLY)
    }

    pub fn depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Add a header sent with network fetches. Invalid names or values are ignored.
    pub fn http_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.http_headers.append(name, value);
            }
            _ => tracing::warn!(name, "Ignoring invalid request header"),
        }
        self
    }

    pub fn progress_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress_listener = Some(listener);
        self
    }

    pub fn build(self) -> ImageRequest {
        let key = RequestKey::new(&self.uri, &self.options, &self.transformations);
        ImageRequest {
            uri: self.uri,
            options: self.options,
            transformations: self.transformations,
            key,
            memory_cache_policy: self.memory_cache_policy,
            result_cache_policy: self.result_cache_policy,
            download_cache_policy: self.download_cache_policy,
            depth: self.depth,
            http_headers: self.http_headers,
            progress_listener: self.progress_listener,
        }
    }
}
