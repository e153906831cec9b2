//! Test utilities for integration tests.
//!
//! Mock HTTP stacks with request tracking, in-process image encoders and
//! recording targets.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use pictor::error::{HttpError, LoadError};
use pictor::http::{ByteStream, HttpResponse, HttpStack};
use pictor::pipeline::{ImageEngine, ImageResult, Target};
use pictor::request::ProgressListener;

// =============================================================================
// Test Images
// =============================================================================

/// A gradient so that crops and resizes produce distinguishable pixels.
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    DynamicImage::ImageRgb8(image)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Png)
}

/// Pseudo-random pixels, which PNG cannot compress much.
pub fn noise_png(width: u32, height: u32) -> Vec<u8> {
    let mut state: u32 = 0x2545_F491;
    let image = RgbImage::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [a, b, c, _] = state.to_le_bytes();
        Rgb([a, b, c])
    });
    encode(&DynamicImage::ImageRgb8(image), ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&gradient(width, height), ImageFormat::Jpeg)
}

/// A PNG signature followed by garbage.
pub fn corrupt_png() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0xAB; 64]);
    bytes
}

/// Names of `*.tmp` files left anywhere under `dir`.
pub fn tmp_files(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(tmp_files(&path));
        } else if path.extension().is_some_and(|ext| ext == "tmp") {
            found.push(path.display().to_string());
        }
    }
    found
}

/// Wait until the engine has no execution in flight.
pub async fn wait_idle(engine: &ImageEngine) {
    for _ in 0..200 {
        if engine.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine still has {} executions in flight", engine.in_flight());
}

/// Wait until `cond` holds, polling every 10ms for up to two seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// =============================================================================
// Mock HTTP Stack with Request Tracking
// =============================================================================

#[derive(Clone)]
struct MockRoute {
    status: StatusCode,
    body: Bytes,
    content_type: Option<&'static str>,
}

/// An in-memory [`HttpStack`] that counts requests.
///
/// Unknown URLs answer 404. Bodies are streamed in `chunk_size` pieces with
/// an optional pause before each chunk, and can be cut off with a read
/// error after a fixed number of chunks.
#[derive(Clone)]
pub struct MockHttpStack {
    routes: Arc<Mutex<HashMap<String, MockRoute>>>,
    request_count: Arc<AtomicUsize>,
    headers_seen: Arc<Mutex<Vec<HeaderMap>>>,
    response_delay: Duration,
    chunk_delay: Duration,
    chunk_size: usize,
    fail_after: Option<usize>,
}

impl MockHttpStack {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            request_count: Arc::new(AtomicUsize::new(0)),
            headers_seen: Arc::new(Mutex::new(Vec::new())),
            response_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            chunk_size: 4096,
            fail_after: None,
        }
    }

    /// Serve `body` with status 200.
    pub fn with_image(self, url: &str, body: Vec<u8>) -> Self {
        self.set_route(url, StatusCode::OK, body, Some("image/png"));
        self
    }

    pub fn with_status(self, url: &str, status: StatusCode) -> Self {
        self.set_route(url, status, Vec::new(), None);
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn with_chunks(mut self, chunk_size: usize, delay: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_delay = delay;
        self
    }

    /// End every body with a connection reset after `chunks` chunks.
    pub fn with_failure_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn set_route(
        &self,
        url: &str,
        status: StatusCode,
        body: Vec<u8>,
        content_type: Option<&'static str>,
    ) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            MockRoute {
                status,
                body: Bytes::from(body),
                content_type,
            },
        );
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn headers_seen(&self) -> Vec<HeaderMap> {
        self.headers_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpStack for MockHttpStack {
    async fn get_response(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, HttpError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.headers_seen.lock().unwrap().push(headers.clone());

        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }

        let route = self.routes.lock().unwrap().get(url).cloned();
        let route = route.unwrap_or(MockRoute {
            status: StatusCode::NOT_FOUND,
            body: Bytes::new(),
            content_type: None,
        });

        let mut response_headers = HeaderMap::new();
        response_headers.insert(CONTENT_LENGTH, route.body.len().into());
        if let Some(content_type) = route.content_type {
            response_headers.insert(CONTENT_TYPE, content_type.parse().unwrap());
        }

        let mut chunks: Vec<std::io::Result<Bytes>> = route
            .body
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some(n) = self.fail_after {
            chunks.truncate(n);
            chunks.push(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        let delay = self.chunk_delay;
        let body: ByteStream = Box::pin(stream::iter(chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            chunk
        }));

        Ok(HttpResponse::new(route.status, response_headers, body))
    }
}

/// A stack whose every request fails at the transport level.
pub struct FailingHttpStack;

#[async_trait]
impl HttpStack for FailingHttpStack {
    async fn get_response(
        &self,
        _url: &str,
        _headers: &HeaderMap,
    ) -> Result<HttpResponse, HttpError> {
        Err(HttpError::Connect("connection refused".to_string()))
    }
}

// =============================================================================
// Targets and Listeners
// =============================================================================

/// What a [`RecordingTarget`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Success { width: u32, height: u32 },
    Error(String),
}

/// A target that appends every callback to a shared log.
#[derive(Clone, Default)]
pub struct RecordingTarget {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Target for RecordingTarget {
    fn on_start(&mut self) {
        self.events.lock().unwrap().push(Event::Start);
    }

    fn on_success(&mut self, result: ImageResult) {
        self.events.lock().unwrap().push(Event::Success {
            width: result.bitmap().width(),
            height: result.bitmap().height(),
        });
    }

    fn on_error(&mut self, error: LoadError) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(error.code().to_string()));
    }
}

/// Records every progress callback.
#[derive(Default)]
pub struct RecordingProgress {
    calls: Mutex<Vec<(Option<u64>, u64)>>,
}

impl RecordingProgress {
    pub fn calls(&self) -> Vec<(Option<u64>, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProgressListener for RecordingProgress {
    fn on_progress(&self, total: Option<u64>, completed: u64) {
        self.calls.lock().unwrap().push((total, completed));
    }
}
