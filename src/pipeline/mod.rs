//! Request execution pipeline.
//!
//! ```text
//! execute(request)
//!   ├─ memory cache hit? ──────────────────────────────► ImageResult
//!   ├─ depth == Memory? ───────────────────────────────► DepthLimited
//!   └─ coordinator.join_or_register(key)
//!        ├─ Joined: wait for the running execution
//!        └─ Leader: spawn execution
//!             ├─ result cache (transformed PNG)
//!             ├─ download cache (raw bytes)
//!             ├─ fetcher ──► download cache writer (streamed)
//!             ├─ decoder (blocking pool, decode limiter)
//!             └─ result cache write, publish, release
//!   every waiter: memory cache put (own policy) ────────► ImageResult
//! ```

mod coordinator;
mod engine;
mod executor;
mod limiter;
mod target;

use std::fmt;
use std::sync::Arc;

use crate::cache::{CachedImage, MemoryLease};
use crate::decode::{Bitmap, DecodeResult, ImageInfo};
use crate::fetch::DataFrom;
use crate::request::RequestKey;

pub use coordinator::{Execution, Registration, RequestCoordinator, Waiter};
pub use engine::{EngineBuilder, EngineStats, ImageEngine};
pub use limiter::{ConcurrencyLimiter, ConcurrencyPermit, LimiterStats};
pub use target::{RequestHandle, Target};

/// A successfully loaded image as delivered to the caller.
///
/// When the memory cache holds the image, the result carries a lease on the
/// entry; the entry stays unevictable until the result is dropped.
pub struct ImageResult {
    key: RequestKey,
    image: Arc<CachedImage>,
    data_from: DataFrom,
    lease: Option<MemoryLease>,
}

impl ImageResult {
    pub(crate) fn from_lease(key: RequestKey, lease: MemoryLease, data_from: DataFrom) -> Self {
        Self {
            key,
            image: lease.image().clone(),
            data_from,
            lease: Some(lease),
        }
    }

    pub(crate) fn from_decode(key: RequestKey, result: &DecodeResult) -> Self {
        Self {
            key,
            image: Arc::new(cached_image(result)),
            data_from: result.data_from,
            lease: None,
        }
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn bitmap(&self) -> &Arc<Bitmap> {
        &self.image.bitmap
    }

    pub fn image_info(&self) -> &ImageInfo {
        &self.image.image_info
    }

    pub fn transformations(&self) -> &[String] {
        &self.image.transformations
    }

    pub fn data_from(&self) -> DataFrom {
        self.data_from
    }

    /// Whether this result holds a reference on a memory cache entry.
    pub fn is_memory_cached(&self) -> bool {
        self.lease.is_some()
    }
}

impl fmt::Debug for ImageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResult")
            .field("key", &self.key)
            .field("bitmap", &self.image.bitmap)
            .field("data_from", &self.data_from)
            .field("transformations", &self.image.transformations)
            .finish()
    }
}

pub(crate) fn cached_image(result: &DecodeResult) -> CachedImage {
    CachedImage::new(
        result.bitmap.clone(),
        result.image_info.clone(),
        result.transformations.clone(),
    )
}
