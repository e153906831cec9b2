//! # pictor
//!
//! An image loading engine: fetch, decode and cache images behind a
//! deduplicating request pipeline.
//!
//! ## Features
//!
//! - **Request coalescing**: concurrent requests for the same key share one
//!   fetch and one decode
//! - **Three cache tiers**: a reference-counted memory LRU of decoded bitmaps,
//!   a disk LRU of raw downloads, and a disk LRU of transformed results
//! - **Crash-safe disk cache**: staged writes with atomic rename, a journaled
//!   index validated at startup, and a lock file per directory
//! - **Pluggable sources and codecs**: ordered fetcher and decoder factory
//!   chains for `http(s)`, `file`, `asset`, `content` and `data:` URIs
//! - **Cancellation**: the last requester leaving stops the work in flight
//! - **HTTP API**: an axum server exposing the engine
//!
//! ## Architecture
//!
//! - [`request`] - Immutable requests, decode options, cache keys
//! - [`http`] - HTTP stack abstraction and the reqwest implementation
//! - [`fetch`] - Fetcher variants and their factories
//! - [`decode`] - Decoder variants, sampling, orientation and transformations
//! - [`cache`] - Memory, download and result caches
//! - [`pipeline`] - Coordinator, executor and the [`ImageEngine`]
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use pictor::{ImageEngine, ImageRequest, Resize};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pictor::LoadError> {
//!     let engine = ImageEngine::builder()
//!         .cache_dir("/tmp/pictor-cache")
//!         .build();
//!
//!     let request = ImageRequest::builder("https://example.com/photo.jpg")
//!         .resize(Resize::new(256, 256))
//!         .build();
//!
//!     let result = engine.execute(request).await?;
//!     println!(
//!         "{}x{} from {}",
//!         result.bitmap().width(),
//!         result.bitmap().height(),
//!         result.data_from()
//!     );
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod components;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod http;
pub mod pipeline;
pub mod request;
pub mod server;

// Re-export commonly used types
pub use cache::{
    DiskCache, DiskCacheStats, DiskCacheWriter, DiskSnapshot, MemoryCache, MemoryCacheStats,
    MemoryLease, ResultCache,
};
pub use cancel::CancelToken;
pub use components::ComponentRegistry;
pub use config::{Cli, Command, EngineConfig, FetchConfig, ServeConfig};
pub use decode::{
    Bitmap, DecodeResult, Decoder, DecoderFactory, ImageInfo, RotateTransformation, Transformation,
};
pub use error::{CacheError, HttpError, LoadError};
pub use fetch::{DataFrom, DataSource, FetchResult, Fetcher, FetcherFactory};
pub use http::{HttpResponse, HttpStack, ReqwestHttpStack};
pub use pipeline::{
    EngineBuilder, EngineStats, ImageEngine, ImageResult, RequestCoordinator, RequestHandle,
    Target,
};
pub use request::{
    CachePolicy, ColorConfig, DecodeOptions, Depth, ImageRequest, Precision, ProgressListener,
    Region, RequestKey, Resize, Scale,
};
pub use server::{create_router, RouterConfig};
