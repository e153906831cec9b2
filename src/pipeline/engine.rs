use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::coordinator::{Execution, Registration, RequestCoordinator};
use super::executor;
use super::limiter::{ConcurrencyLimiter, LimiterStats};
use super::target::{self, RequestHandle, Target};
use super::{cached_image, ImageResult};
use crate::cache::{
    DiskCache, DiskCacheStats, MemoryCache, MemoryCacheStats, ResultCache,
    DEFAULT_DISK_CACHE_CAPACITY, DEFAULT_MEMORY_CACHE_CAPACITY,
};
use crate::components::ComponentRegistry;
use crate::decode::{DecodeResult, DecoderFactory, RasterDecoderFactory};
use crate::error::{CacheError, LoadError};
use crate::fetch::{
    AssetFetcherFactory, ContentFetcherFactory, ContentResolver, DataFrom, DataUriFetcherFactory,
    FetcherFactory, FileFetcherFactory, HttpFetcherFactory,
};
use crate::http::{HttpStack, ReqwestHttpStack};
use crate::request::{Depth, ImageRequest};

/// Default result cache capacity: 128MB
pub const DEFAULT_RESULT_CACHE_CAPACITY: u64 = 128 * 1024 * 1024;

pub(super) type SharedResult = Arc<DecodeResult>;

/// State shared by the engine handle and its execution tasks.
pub(super) struct EngineInner {
    pub(super) components: ComponentRegistry,
    pub(super) memory: MemoryCache,
    pub(super) download_cache: Option<DiskCache>,
    pub(super) result_cache: Option<ResultCache>,
    pub(super) coordinator: RequestCoordinator<SharedResult>,
    pub(super) io_limiter: ConcurrencyLimiter,
    pub(super) decode_limiter: ConcurrencyLimiter,
}

// =============================================================================
// ImageEngine
// =============================================================================

/// Entry point for loading images.
///
/// Cloning is cheap; clones share caches, components and in-flight state.
#[derive(Clone)]
pub struct ImageEngine {
    inner: Arc<EngineInner>,
}

impl ImageEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Load `request`, deduplicating against identical requests in flight.
    pub async fn execute(&self, request: ImageRequest) -> Result<ImageResult, LoadError> {
        let key = request.key().clone();

        if request.memory_cache_policy().read {
            if let Some(lease) = self.inner.memory.get(&key) {
                debug!(key = %key, "Memory cache hit");
                return Ok(ImageResult::from_lease(key, lease, DataFrom::MemoryCache));
            }
        }

        if request.depth() == Depth::Memory {
            return Err(LoadError::DepthLimited {
                uri: request.uri().to_string(),
                depth: request.depth().to_string(),
            });
        }

        let waiter = match self.inner.coordinator.join_or_register(&key) {
            Registration::Joined(waiter) => {
                debug!(key = %key, id = waiter.execution().id(), "Joined in-flight execution");
                waiter
            }
            Registration::Leader(waiter) => {
                self.spawn_execution(request.clone(), waiter.execution().clone());
                waiter
            }
        };

        let result = waiter.wait().await?;
        Ok(self.deliver(&request, result))
    }

    /// Run `request` in the background and report to `target`.
    pub fn enqueue<T: Target>(&self, request: ImageRequest, target: T) -> RequestHandle {
        target::spawn(self.clone(), request, target)
    }

    fn spawn_execution(&self, request: ImageRequest, execution: Arc<Execution<SharedResult>>) {
        let inner = self.inner.clone();
        let task_execution = execution.clone();

        let handle = tokio::spawn(async move {
            let key = task_execution.key().clone();
            let cancel = task_execution.cancel_token().clone();
            let started = Instant::now();

            let run = executor::run(&inner, &request, &cancel);
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(result) => result.map(Arc::new),
                Err(_) => Err(LoadError::Internal("execution panicked".to_string())),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(decoded) => debug!(
                    key = %key,
                    data_from = %decoded.data_from,
                    elapsed_ms,
                    "Execution finished"
                ),
                Err(LoadError::Cancelled) => debug!(key = %key, elapsed_ms, "Execution cancelled"),
                Err(e) => warn!(key = %key, error = %e, elapsed_ms, "Execution failed"),
            }

            // Stored before waking waiters and held until the key is free, so a
            // request arriving in between hits memory instead of refetching
            let lease = match &result {
                Ok(decoded) if request.memory_cache_policy().write => {
                    let image = Arc::new(cached_image(decoded));
                    let size = image.size();
                    Some(inner.memory.put(key.clone(), image, size))
                }
                _ => None,
            };

            task_execution.complete(result);
            inner.coordinator.release(&key, task_execution.id());
            drop(lease);
        });
        execution.set_abort_handle(handle.abort_handle());
    }

    /// Build the caller's result. With memory writes allowed the caller takes
    /// a lease on the entry the leader stored, or stores one itself.
    fn deliver(&self, request: &ImageRequest, result: SharedResult) -> ImageResult {
        let key = request.key().clone();
        if request.memory_cache_policy().write {
            if let Some(lease) = self.inner.memory.acquire(&key) {
                return ImageResult::from_lease(key, lease, result.data_from);
            }
            let image = Arc::new(cached_image(&result));
            let size = image.size();
            let lease = self.inner.memory.put(key.clone(), image, size);
            return ImageResult::from_lease(key, lease, result.data_from);
        }
        ImageResult::from_decode(key, &result)
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        &self.inner.memory
    }

    pub fn download_cache(&self) -> Option<&DiskCache> {
        self.inner.download_cache.as_ref()
    }

    pub fn result_cache(&self) -> Option<&ResultCache> {
        self.inner.result_cache.as_ref()
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.inner.components
    }

    /// Number of executions currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.coordinator.in_flight()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            memory: self.inner.memory.stats(),
            download: self.inner.download_cache.as_ref().map(|c| c.stats()),
            result: self.inner.result_cache.as_ref().map(|c| c.disk().stats()),
            in_flight: self.in_flight(),
            io: self.inner.io_limiter.stats(),
            decode: self.inner.decode_limiter.stats(),
        }
    }

    /// Drop every unreferenced memory entry and every disk entry.
    pub fn clear_caches(&self) -> Result<(), CacheError> {
        self.inner.memory.clear();
        if let Some(cache) = &self.inner.download_cache {
            cache.clear()?;
        }
        if let Some(cache) = &self.inner.result_cache {
            cache.disk().clear()?;
        }
        Ok(())
    }
}

impl fmt::Debug for ImageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageEngine")
            .field("fetchers", &self.inner.components.fetcher_names())
            .field("decoders", &self.inner.components.decoder_names())
            .field("download_cache", &self.inner.download_cache)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Counters across every tier, served by `/cache/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub memory: MemoryCacheStats,
    pub download: Option<DiskCacheStats>,
    pub result: Option<DiskCacheStats>,
    pub in_flight: usize,
    pub io: LimiterStats,
    pub decode: LimiterStats,
}

// =============================================================================
// EngineBuilder
// =============================================================================

/// Configures and builds an [`ImageEngine`].
///
/// Disk tiers are enabled by [`cache_dir`](Self::cache_dir); each gets its own
/// subdirectory. A tier whose directory cannot be opened is disabled with a
/// warning rather than failing the build.
pub struct EngineBuilder {
    memory_capacity: usize,
    cache_dir: Option<PathBuf>,
    download_capacity: u64,
    result_capacity: u64,
    http_stack: Option<Arc<dyn HttpStack>>,
    network: bool,
    asset_root: Option<PathBuf>,
    content_resolver: Option<Arc<dyn ContentResolver>>,
    fetchers: Vec<Arc<dyn FetcherFactory>>,
    decoders: Vec<Arc<dyn DecoderFactory>>,
    io_concurrency: Option<usize>,
    decode_concurrency: Option<usize>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CACHE_CAPACITY,
            cache_dir: None,
            download_capacity: DEFAULT_DISK_CACHE_CAPACITY,
            result_capacity: DEFAULT_RESULT_CACHE_CAPACITY,
            http_stack: None,
            network: true,
            asset_root: None,
            content_resolver: None,
            fetchers: Vec::new(),
            decoders: Vec::new(),
            io_concurrency: None,
            decode_concurrency: None,
        }
    }
}

impl EngineBuilder {
    pub fn memory_capacity(mut self, bytes: usize) -> Self {
        self.memory_capacity = bytes;
        self
    }

    /// Root directory for the download and result caches.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Download cache capacity; zero disables the tier.
    pub fn download_cache_capacity(mut self, bytes: u64) -> Self {
        self.download_capacity = bytes;
        self
    }

    /// Result cache capacity; zero disables the tier.
    pub fn result_cache_capacity(mut self, bytes: u64) -> Self {
        self.result_capacity = bytes;
        self
    }

    /// HTTP stack for `http`/`https` URIs. Defaults to [`ReqwestHttpStack`].
    pub fn http_stack(mut self, stack: Arc<dyn HttpStack>) -> Self {
        self.http_stack = Some(stack);
        self.network = true;
        self
    }

    /// Do not register a network fetcher.
    pub fn without_network(mut self) -> Self {
        self.network = false;
        self.http_stack = None;
        self
    }

    /// Directory served for `asset://` URIs.
    pub fn asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    /// Resolver for `content://` URIs.
    pub fn content_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.content_resolver = Some(resolver);
        self
    }

    /// Add a fetcher factory, consulted before the built-in ones.
    pub fn fetcher(mut self, factory: Arc<dyn FetcherFactory>) -> Self {
        self.fetchers.push(factory);
        self
    }

    /// Add a decoder factory, consulted before the built-in ones.
    pub fn decoder(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoders.push(factory);
        self
    }

    pub fn io_concurrency(mut self, permits: usize) -> Self {
        self.io_concurrency = Some(permits);
        self
    }

    pub fn decode_concurrency(mut self, permits: usize) -> Self {
        self.decode_concurrency = Some(permits);
        self
    }

    fn open_tier(&self, name: &str, capacity: u64) -> Option<DiskCache> {
        let dir = self.cache_dir.as_ref()?.join(name);
        if capacity == 0 {
            return None;
        }
        match DiskCache::open(&dir, capacity) {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(tier = name, dir = %dir.display(), error = %e, "Disk cache unavailable, continuing without it");
                None
            }
        }
    }

    fn components(&mut self) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        for factory in self.fetchers.drain(..) {
            registry = registry.with_fetcher(factory);
        }

        if self.network {
            let stack = match self.http_stack.take() {
                Some(stack) => Some(stack),
                None => match ReqwestHttpStack::new() {
                    Ok(stack) => Some(Arc::new(stack) as Arc<dyn HttpStack>),
                    Err(e) => {
                        warn!(error = %e, "HTTP client unavailable, network loading disabled");
                        None
                    }
                },
            };
            if let Some(stack) = stack {
                registry = registry.with_fetcher(Arc::new(HttpFetcherFactory::new(stack)));
            }
        }

        registry = registry.with_fetcher(Arc::new(FileFetcherFactory));
        if let Some(root) = self.asset_root.take() {
            registry = registry.with_fetcher(Arc::new(AssetFetcherFactory::new(root)));
        }
        if let Some(resolver) = self.content_resolver.take() {
            registry = registry.with_fetcher(Arc::new(ContentFetcherFactory::new(resolver)));
        }
        registry = registry.with_fetcher(Arc::new(DataUriFetcherFactory));

        for factory in self.decoders.drain(..) {
            registry = registry.with_decoder(factory);
        }
        registry.with_decoder(Arc::new(RasterDecoderFactory))
    }

    pub fn build(mut self) -> ImageEngine {
        let download_cache = self.open_tier("download", self.download_capacity);
        let result_cache = self
            .open_tier("result", self.result_capacity)
            .map(ResultCache::new);
        let components = self.components();

        let io_limiter = match self.io_concurrency {
            Some(permits) => ConcurrencyLimiter::new(permits, "io"),
            None => ConcurrencyLimiter::io_default(),
        };
        let decode_limiter = match self.decode_concurrency {
            Some(permits) => ConcurrencyLimiter::new(permits, "decode"),
            None => ConcurrencyLimiter::decode_default(),
        };

        info!(
            fetchers = ?components.fetcher_names(),
            decoders = ?components.decoder_names(),
            memory_capacity = self.memory_capacity,
            download_cache = download_cache.is_some(),
            result_cache = result_cache.is_some(),
            io_concurrency = io_limiter.max_concurrent(),
            decode_concurrency = decode_limiter.max_concurrent(),
            "Image engine ready"
        );

        ImageEngine {
            inner: Arc::new(EngineInner {
                components,
                memory: MemoryCache::with_capacity(self.memory_capacity),
                download_cache,
                result_cache,
                coordinator: RequestCoordinator::new(),
                io_limiter,
                decode_limiter,
            }),
        }
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("memory_capacity", &self.memory_capacity)
            .field("cache_dir", &self.cache_dir)
            .field("download_capacity", &self.download_capacity)
            .field("result_capacity", &self.result_capacity)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}
