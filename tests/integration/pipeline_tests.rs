//! Pipeline integration tests.
//!
//! Tests verify:
//! - One fetch per key under concurrent requests, shared bitmaps
//! - Tier order: memory, result cache, download cache, network
//! - Failures are delivered to every waiter and never cached
//! - Depth limits and forced refresh
//! - Cancellation of the last waiter stops the execution and discards
//!   partial downloads
//! - Background requests delivered to targets

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use http::StatusCode;

use pictor::fetch::{DataFrom, DataSource, FetchResult, Fetcher, FetcherFactory};
use pictor::request::{CachePolicy, Depth, ImageRequest, Resize};
use pictor::{ImageEngine, LoadError};

use super::test_utils::{
    corrupt_png, jpeg_bytes, noise_png, png_bytes, tmp_files, wait_for, wait_idle, Event, FailingHttpStack,
    MockHttpStack, RecordingProgress, RecordingTarget,
};

const URL: &str = "https://images.test/photo.png";

fn engine_with(stack: &MockHttpStack, cache_dir: Option<&std::path::Path>) -> ImageEngine {
    let mut builder = ImageEngine::builder().http_stack(Arc::new(stack.clone()));
    if let Some(dir) = cache_dir {
        builder = builder.cache_dir(dir);
    }
    builder.build()
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let stack = MockHttpStack::new()
        .with_image(URL, png_bytes(64, 48))
        .with_response_delay(Duration::from_millis(100));
    let engine = engine_with(&stack, None);

    let futures: Vec<_> = (0..8)
        .map(|_| engine.execute(ImageRequest::new(URL)))
        .collect();
    let results = futures_util::future::join_all(futures).await;

    assert_eq!(stack.request_count(), 1);
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    for result in &results {
        assert!(Arc::ptr_eq(result.bitmap(), results[0].bitmap()));
        assert!(result.is_memory_cached());
    }
    let key = results[0].key().clone();
    assert_eq!(engine.memory_cache().reference_count(&key), Some(8));

    drop(results);
    assert_eq!(engine.memory_cache().reference_count(&key), Some(0));
}

#[tokio::test]
async fn test_concurrent_spawned_requests_share_one_fetch() {
    let stack = MockHttpStack::new()
        .with_image(URL, png_bytes(32, 32))
        .with_response_delay(Duration::from_millis(100));
    let engine = engine_with(&stack, None);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute(ImageRequest::new(URL)).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.bitmap().width(), 32);
    }
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_different_options_are_different_executions() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(64, 64));
    let engine = engine_with(&stack, None);

    let full = engine.execute(ImageRequest::new(URL)).await.unwrap();
    let small = engine
        .execute(
            ImageRequest::builder(URL)
                .resize(Resize::new(16, 16))
                .build(),
        )
        .await
        .unwrap();

    assert_eq!(full.bitmap().width(), 64);
    assert_eq!(small.bitmap().width(), 16);
    assert_ne!(full.key(), small.key());
    assert_eq!(stack.request_count(), 2);
}

// =============================================================================
// Cache Tiers
// =============================================================================

#[tokio::test]
async fn test_memory_cache_hit() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(20, 10));
    let engine = engine_with(&stack, None);

    let first = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(first.data_from(), DataFrom::Network);

    let second = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(second.data_from(), DataFrom::MemoryCache);
    assert!(Arc::ptr_eq(first.bitmap(), second.bitmap()));
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_result_in_memory_before_key_is_released() {
    let stack = MockHttpStack::new()
        .with_image(URL, png_bytes(20, 10))
        .with_response_delay(Duration::from_millis(50));
    let engine = engine_with(&stack, None);

    // Start the load, then leave the caller unpolled while the execution finishes
    let mut first = Box::pin(engine.execute(ImageRequest::new(URL)));
    assert!(futures_util::poll!(&mut first).is_pending());
    wait_idle(&engine).await;
    assert!(engine.memory_cache().contains(ImageRequest::new(URL).key()));

    let second = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(second.data_from(), DataFrom::MemoryCache);
    assert_eq!(stack.request_count(), 1);

    let first = first.await.unwrap();
    assert_eq!(first.data_from(), DataFrom::Network);
    assert!(Arc::ptr_eq(first.bitmap(), second.bitmap()));
}

#[tokio::test]
async fn test_download_cache_hit_after_memory_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new().with_image(URL, png_bytes(20, 10));
    let engine = engine_with(&stack, Some(dir.path()));

    let first = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(first.data_from(), DataFrom::Network);
    drop(first);

    assert!(engine.download_cache().unwrap().contains(URL));
    engine.memory_cache().clear();

    let second = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(second.data_from(), DataFrom::DownloadCache);
    assert_eq!(second.bitmap().width(), 20);
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_result_cache_hit_for_transformed_request() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new().with_image(URL, png_bytes(64, 48));
    let engine = engine_with(&stack, Some(dir.path()));
    let request = ImageRequest::builder(URL)
        .resize(Resize::new(32, 24))
        .build();

    let first = engine.execute(request.clone()).await.unwrap();
    assert_eq!(first.data_from(), DataFrom::Network);
    assert!(!first.transformations().is_empty());
    drop(first);

    engine.memory_cache().clear();

    let second = engine.execute(request).await.unwrap();
    assert_eq!(second.data_from(), DataFrom::ResultCache);
    assert_eq!(
        (second.bitmap().width(), second.bitmap().height()),
        (32, 24)
    );
    assert_eq!(second.image_info().width, 64);
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_untransformed_result_not_stored_in_result_cache() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new().with_image(URL, png_bytes(16, 16));
    let engine = engine_with(&stack, Some(dir.path()));

    let request = ImageRequest::new(URL);
    engine.execute(request.clone()).await.unwrap();

    let result_cache = engine.result_cache().unwrap();
    assert!(result_cache.get(request.key()).await.is_none());
    assert_eq!(result_cache.disk().stats().entries, 0);
}

#[tokio::test]
async fn test_caches_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new().with_image(URL, jpeg_bytes(40, 30));

    {
        let engine = engine_with(&stack, Some(dir.path()));
        engine.execute(ImageRequest::new(URL)).await.unwrap();
        wait_idle(&engine).await;
    }

    // Execution tasks release their handle on the engine shortly after completing
    let lock = dir.path().join("download").join("cache.lock");
    assert!(wait_for(|| !lock.exists()).await, "lock file not released");

    let engine = engine_with(&stack, Some(dir.path()));
    let result = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(result.data_from(), DataFrom::DownloadCache);
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_memory_write_disabled_does_not_cache() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(8, 8));
    let engine = engine_with(&stack, None);

    let request = ImageRequest::builder(URL)
        .memory_cache_policy(CachePolicy::READ_ONLY)
        .build();
    let result = engine.execute(request).await.unwrap();
    assert!(!result.is_memory_cached());
    assert!(!engine.memory_cache().contains(result.key()));
}

#[tokio::test]
async fn test_force_refresh_refetches_and_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new().with_image(URL, png_bytes(10, 10));
    let engine = engine_with(&stack, Some(dir.path()));

    let first = engine.execute(ImageRequest::new(URL)).await.unwrap();
    drop(first);

    stack.set_route(URL, StatusCode::OK, png_bytes(12, 12), Some("image/png"));
    let refreshed = engine
        .execute(ImageRequest::builder(URL).force_refresh().build())
        .await
        .unwrap();
    assert_eq!(refreshed.data_from(), DataFrom::Network);
    assert_eq!(refreshed.bitmap().width(), 12);
    assert_eq!(stack.request_count(), 2);
    drop(refreshed);

    // The fresh result replaced the stale one in memory
    let cached = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(cached.data_from(), DataFrom::MemoryCache);
    assert_eq!(cached.bitmap().width(), 12);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failures_are_not_cached() {
    let stack = MockHttpStack::new().with_status(URL, StatusCode::SERVICE_UNAVAILABLE);
    let engine = engine_with(&stack, None);

    let err = engine.execute(ImageRequest::new(URL)).await.unwrap_err();
    assert!(matches!(err, LoadError::ServerError { status: 503, .. }));
    assert!(err.is_retryable());

    stack.set_route(URL, StatusCode::OK, png_bytes(4, 4), Some("image/png"));
    let result = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(result.data_from(), DataFrom::Network);
    assert_eq!(stack.request_count(), 2);
}

#[tokio::test]
async fn test_failure_fans_out_to_every_waiter() {
    let stack = MockHttpStack::new()
        .with_status(URL, StatusCode::NOT_FOUND)
        .with_response_delay(Duration::from_millis(50));
    let engine = engine_with(&stack, None);

    let futures: Vec<_> = (0..4)
        .map(|_| engine.execute(ImageRequest::new(URL)))
        .collect();
    for result in futures_util::future::join_all(futures).await {
        assert!(matches!(result, Err(LoadError::SourceNotFound { .. })));
    }
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_status_mapping() {
    let stack = MockHttpStack::new()
        .with_status("https://images.test/gone", StatusCode::GONE)
        .with_status("https://images.test/slow", StatusCode::TOO_MANY_REQUESTS)
        .with_status("https://images.test/auth", StatusCode::FORBIDDEN);
    let engine = engine_with(&stack, None);

    let err = engine
        .execute(ImageRequest::new("https://images.test/gone"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::SourceNotFound { .. }));

    let err = engine
        .execute(ImageRequest::new("https://images.test/slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::TransientNetwork { .. }));

    let err = engine
        .execute(ImageRequest::new("https://images.test/auth"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::HttpStatus { status: 403, .. }));
}

#[tokio::test]
async fn test_transport_failure_is_transient() {
    let engine = ImageEngine::builder()
        .http_stack(Arc::new(FailingHttpStack))
        .build();

    let err = engine.execute(ImageRequest::new(URL)).await.unwrap_err();
    assert!(matches!(err, LoadError::TransientNetwork { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_corrupt_image_fails_decode() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new().with_image(URL, corrupt_png());
    let engine = engine_with(&stack, Some(dir.path()));

    let err = engine.execute(ImageRequest::new(URL)).await.unwrap_err();
    assert!(matches!(
        err,
        LoadError::DecodeMalformed(_) | LoadError::DecodeUnsupported(_)
    ));
    assert!(!engine.memory_cache().contains(ImageRequest::new(URL).key()));
    assert!(!engine.download_cache().unwrap().contains(URL));
}

#[tokio::test]
async fn test_not_found_leaves_no_cache_entries() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new()
        .with_status(URL, StatusCode::NOT_FOUND)
        .with_response_delay(Duration::from_millis(50));
    let engine = engine_with(&stack, Some(dir.path()));

    let futures: Vec<_> = (0..3)
        .map(|_| engine.execute(ImageRequest::new(URL)))
        .collect();
    for result in futures_util::future::join_all(futures).await {
        assert!(matches!(result, Err(LoadError::SourceNotFound { .. })));
    }

    assert_eq!(stack.request_count(), 1);
    assert!(!engine.memory_cache().contains(ImageRequest::new(URL).key()));
    assert!(!engine.download_cache().unwrap().contains(URL));
    assert_eq!(engine.download_cache().unwrap().stats().entries, 0);
    assert!(tmp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_body_error_midway_discards_partial_download() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new()
        .with_image(URL, noise_png(64, 64))
        .with_chunks(1024, Duration::ZERO)
        .with_failure_after(3);
    let engine = engine_with(&stack, Some(dir.path()));

    let err = engine.execute(ImageRequest::new(URL)).await.unwrap_err();
    assert!(matches!(err, LoadError::TransientNetwork { .. }), "{err:?}");
    assert!(err.is_retryable());

    assert!(tmp_files(dir.path()).is_empty());
    assert!(!engine.download_cache().unwrap().contains(URL));
    assert!(!engine.memory_cache().contains(ImageRequest::new(URL).key()));
}

#[tokio::test]
async fn test_unknown_scheme_has_no_fetcher() {
    let engine = ImageEngine::builder().without_network().build();

    let err = engine
        .execute(ImageRequest::new("ftp://images.test/a.png"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::NoMatchingHandler { .. }));
}

// =============================================================================
// Depth
// =============================================================================

#[tokio::test]
async fn test_memory_depth_never_fetches() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(8, 8));
    let engine = engine_with(&stack, None);

    let request = ImageRequest::builder(URL).depth(Depth::Memory).build();
    let err = engine.execute(request.clone()).await.unwrap_err();
    assert!(matches!(err, LoadError::DepthLimited { .. }));
    assert_eq!(stack.request_count(), 0);

    let _held = engine.execute(ImageRequest::new(URL)).await.unwrap();
    let result = engine.execute(request).await.unwrap();
    assert_eq!(result.data_from(), DataFrom::MemoryCache);
}

#[tokio::test]
async fn test_local_depth_uses_disk_but_not_network() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new()
        .with_image(URL, png_bytes(8, 8))
        .with_image("https://images.test/other.png", png_bytes(8, 8));
    let engine = engine_with(&stack, Some(dir.path()));

    drop(engine.execute(ImageRequest::new(URL)).await.unwrap());
    engine.memory_cache().clear();

    let local = ImageRequest::builder(URL).depth(Depth::Local).build();
    let result = engine.execute(local).await.unwrap();
    assert_eq!(result.data_from(), DataFrom::DownloadCache);

    let other = ImageRequest::builder("https://images.test/other.png")
        .depth(Depth::Local)
        .build();
    let err = engine.execute(other).await.unwrap_err();
    assert!(matches!(err, LoadError::DepthLimited { .. }));
    assert_eq!(stack.request_count(), 1);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelling_last_waiter_stops_execution() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new()
        .with_image(URL, noise_png(128, 128))
        .with_chunks(4096, Duration::from_millis(50));
    let engine = engine_with(&stack, Some(dir.path()));

    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(ImageRequest::new(URL)).await })
    };

    // Let the body start streaming into the download cache
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.in_flight(), 1);
    task.abort();

    wait_idle(&engine).await;
    let root = dir.path().to_path_buf();
    assert!(
        wait_for(|| tmp_files(&root).is_empty()).await,
        "partial download left behind: {:?}",
        tmp_files(&root)
    );
    assert!(!engine.download_cache().unwrap().contains(URL));
    assert!(!engine.memory_cache().contains(ImageRequest::new(URL).key()));
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_cancelling_one_waiter_keeps_execution_for_others() {
    let stack = MockHttpStack::new()
        .with_image(URL, png_bytes(16, 16))
        .with_response_delay(Duration::from_millis(150));
    let engine = engine_with(&stack, None);

    let cancelled = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(ImageRequest::new(URL)).await })
    };
    let survivor = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(ImageRequest::new(URL)).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    cancelled.abort();

    let result = survivor.await.unwrap().unwrap();
    assert_eq!(result.bitmap().width(), 16);
    assert_eq!(stack.request_count(), 1);
}

#[tokio::test]
async fn test_new_request_after_cancel_starts_fresh_execution() {
    let stack = MockHttpStack::new()
        .with_image(URL, png_bytes(16, 16))
        .with_response_delay(Duration::from_millis(100));
    let engine = engine_with(&stack, None);

    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(ImageRequest::new(URL)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.abort();
    wait_idle(&engine).await;

    let result = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(result.data_from(), DataFrom::Network);
    assert_eq!(stack.request_count(), 2);
}

// =============================================================================
// Targets
// =============================================================================

#[tokio::test]
async fn test_enqueue_delivers_success() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(24, 12));
    let engine = engine_with(&stack, None);
    let target = RecordingTarget::new();

    let handle = engine.enqueue(ImageRequest::new(URL), target.clone());
    handle.join().await;

    assert_eq!(
        target.events(),
        vec![
            Event::Start,
            Event::Success {
                width: 24,
                height: 12
            }
        ]
    );
}

#[tokio::test]
async fn test_enqueue_delivers_error() {
    let stack = MockHttpStack::new();
    let engine = engine_with(&stack, None);
    let target = RecordingTarget::new();

    engine
        .enqueue(ImageRequest::new(URL), target.clone())
        .join()
        .await;

    assert_eq!(
        target.events(),
        vec![Event::Start, Event::Error("source_not_found".to_string())]
    );
}

struct PanickingTarget;

impl pictor::pipeline::Target for PanickingTarget {
    fn on_success(&mut self, _result: pictor::pipeline::ImageResult) {
        panic!("target failed to handle the image");
    }

    fn on_error(&mut self, _error: LoadError) {}
}

#[tokio::test]
async fn test_panicking_target_does_not_poison_join() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(8, 8));
    let engine = engine_with(&stack, None);

    let handle = engine.enqueue(ImageRequest::new(URL), PanickingTarget);
    handle.join().await;

    // The lease held by the panicking callback was released during unwind
    let key = ImageRequest::new(URL).key().clone();
    assert_eq!(engine.memory_cache().reference_count(&key), Some(0));
    let result = engine.execute(ImageRequest::new(URL)).await.unwrap();
    assert_eq!(result.data_from(), DataFrom::MemoryCache);
}

#[tokio::test]
async fn test_cancelled_target_is_never_called_back() {
    let stack = MockHttpStack::new()
        .with_image(URL, png_bytes(16, 16))
        .with_response_delay(Duration::from_millis(100));
    let engine = engine_with(&stack, None);
    let target = RecordingTarget::new();

    let handle = engine.enqueue(ImageRequest::new(URL), target.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    assert!(handle.is_cancelled());
    handle.join().await;

    wait_idle(&engine).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(target
        .events()
        .iter()
        .all(|event| matches!(event, Event::Start)));
}

// =============================================================================
// Sources and Components
// =============================================================================

#[tokio::test]
async fn test_progress_reported_while_streaming() {
    let body = png_bytes(64, 64);
    let total = body.len() as u64;
    let stack = MockHttpStack::new()
        .with_image(URL, body)
        .with_chunks(512, Duration::ZERO);
    let engine = engine_with(&stack, None);
    let progress = Arc::new(RecordingProgress::default());

    let request = ImageRequest::builder(URL)
        .progress_listener(progress.clone())
        .build();
    engine.execute(request).await.unwrap();

    let calls = progress.calls();
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|(t, _)| *t == Some(total)));
    assert!(calls.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(calls.last().unwrap().1, total);
}

#[tokio::test]
async fn test_request_headers_reach_the_stack() {
    let stack = MockHttpStack::new().with_image(URL, png_bytes(4, 4));
    let engine = engine_with(&stack, None);

    let request = ImageRequest::builder(URL)
        .http_header("Authorization", "Bearer token")
        .build();
    engine.execute(request).await.unwrap();

    let headers = stack.headers_seen();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].get("authorization").unwrap(), "Bearer token");
}

#[tokio::test]
async fn test_local_file_and_data_uri() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.png");
    std::fs::write(&path, png_bytes(6, 5)).unwrap();
    let engine = ImageEngine::builder().without_network().build();

    let result = engine
        .execute(ImageRequest::new(path.to_str().unwrap()))
        .await
        .unwrap();
    assert_eq!(result.data_from(), DataFrom::Local);
    assert_eq!((result.bitmap().width(), result.bitmap().height()), (6, 5));

    let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(3, 2));
    let uri = format!("data:image/png;base64,{encoded}");
    let result = engine.execute(ImageRequest::new(uri)).await.unwrap();
    assert_eq!(result.data_from(), DataFrom::Memory);
    assert_eq!(result.bitmap().width(), 3);

    let missing = dir.path().join("missing.png");
    let err = engine
        .execute(ImageRequest::new(missing.to_str().unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::SourceNotFound { .. }));
}

#[tokio::test]
async fn test_local_sources_skip_download_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.png");
    std::fs::write(&path, png_bytes(6, 5)).unwrap();
    let engine = ImageEngine::builder()
        .without_network()
        .cache_dir(dir.path().join("cache"))
        .build();

    engine
        .execute(ImageRequest::new(path.to_str().unwrap()))
        .await
        .unwrap();
    assert_eq!(engine.download_cache().unwrap().stats().entries, 0);
}

/// Serves a fixed image for `mock://` URIs and counts calls.
struct CountingFactory {
    bytes: Bytes,
    calls: Arc<AtomicUsize>,
}

struct CountingFetcher {
    bytes: Bytes,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self) -> Result<FetchResult, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchResult::new(
            DataSource::Bytes(self.bytes.clone()),
            DataFrom::Local,
        ))
    }
}

impl FetcherFactory for CountingFactory {
    fn name(&self) -> &'static str {
        "CountingFetcher"
    }

    fn create(&self, request: &ImageRequest) -> Option<Box<dyn Fetcher>> {
        (request.scheme().as_deref() == Some("mock")).then(|| {
            Box::new(CountingFetcher {
                bytes: self.bytes.clone(),
                calls: self.calls.clone(),
            }) as Box<dyn Fetcher>
        })
    }
}

#[tokio::test]
async fn test_custom_fetcher_is_consulted_first() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = ImageEngine::builder()
        .without_network()
        .fetcher(Arc::new(CountingFactory {
            bytes: Bytes::from(png_bytes(9, 9)),
            calls: calls.clone(),
        }))
        .build();

    assert_eq!(engine.components().fetcher_names()[0], "CountingFetcher");

    let futures: Vec<_> = (0..4)
        .map(|_| engine.execute(ImageRequest::new("mock://image")))
        .collect();
    for result in futures_util::future::join_all(futures).await {
        assert_eq!(result.unwrap().bitmap().width(), 9);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stats_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let stack = MockHttpStack::new().with_image(URL, png_bytes(8, 8));
    let engine = engine_with(&stack, Some(dir.path()));

    drop(engine.execute(ImageRequest::new(URL)).await.unwrap());
    let stats = engine.stats();
    assert_eq!(stats.memory.entries, 1);
    assert_eq!(stats.download.unwrap().entries, 1);
    assert_eq!(stats.in_flight, 0);

    engine.clear_caches().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.memory.entries, 0);
    assert_eq!(stats.download.unwrap().entries, 0);
}
