//! The work done by an execution's leader.

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::{debug, trace, warn};

use super::engine::EngineInner;
use super::limiter::ConcurrencyLimiter;
use crate::cache::{encode_result, DiskCacheWriter};
use crate::cancel::CancelToken;
use crate::decode::{apply_transformations, DecodeInput, DecodeResult};
use crate::error::LoadError;
use crate::fetch::{map_open_error, DataFrom, DataSource};
use crate::http::ByteStream;
use crate::request::{Depth, ImageRequest};

/// Bytes handed to a decoder factory for signature sniffing
const SNIFF_LEN: usize = 64;

/// Largest initial buffer reserved from a declared content length
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Encoded bytes plus their origin.
struct Fetched {
    bytes: Bytes,
    mime_type: Option<String>,
    data_from: DataFrom,
}

/// Run `f` on the blocking pool under `limiter`.
async fn run_blocking<R, F>(limiter: &ConcurrencyLimiter, f: F) -> Result<R, LoadError>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R, LoadError> + Send + 'static,
{
    let _permit = limiter.acquire().await?;
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LoadError::Internal(format!("{} task failed: {e}", limiter.label())))?
}

/// Load one request from the first tier that has it.
pub(super) async fn run(
    inner: &EngineInner,
    request: &ImageRequest,
    cancel: &CancelToken,
) -> Result<DecodeResult, LoadError> {
    if let Some(result) = read_result_cache(inner, request, cancel).await? {
        return Ok(result);
    }
    cancel.checkpoint()?;

    let fetched = match read_download_cache(inner, request).await? {
        Some(fetched) => fetched,
        None => {
            if request.depth() == Depth::Local && request.is_network() {
                return Err(LoadError::DepthLimited {
                    uri: request.uri().to_string(),
                    depth: request.depth().to_string(),
                });
            }
            fetch(inner, request, cancel).await?
        }
    };
    cancel.checkpoint()?;

    let from_download = matches!(fetched.data_from, DataFrom::Network | DataFrom::DownloadCache);
    let result = match decode(inner, request, fetched, cancel).await {
        Ok(result) => result,
        Err(e) => {
            if from_download && is_undecodable(&e) {
                discard_download(inner, request);
            }
            return Err(e);
        }
    };
    if result.is_transformed() {
        write_result_cache(inner, request, &result).await;
    }
    Ok(result)
}

// =============================================================================
// Result cache
// =============================================================================

async fn read_result_cache(
    inner: &EngineInner,
    request: &ImageRequest,
    cancel: &CancelToken,
) -> Result<Option<DecodeResult>, LoadError> {
    let Some(cache) = inner.result_cache.as_ref() else {
        return Ok(None);
    };
    if !request.result_cache_policy().read {
        return Ok(None);
    }

    let cached = {
        let _permit = inner.io_limiter.acquire().await?;
        cache.get(request.key()).await
    };
    let Some(cached) = cached else {
        return Ok(None);
    };

    cancel.checkpoint()?;
    match run_blocking(&inner.decode_limiter, move || cached.into_decode_result()).await {
        Ok(result) => {
            debug!(key = %request.key(), "Result cache hit");
            Ok(Some(result))
        }
        Err(e) => {
            warn!(key = %request.key(), error = %e, "Discarding undecodable result cache entry");
            cache.remove(request.key());
            Ok(None)
        }
    }
}

async fn write_result_cache(inner: &EngineInner, request: &ImageRequest, result: &DecodeResult) {
    let Some(cache) = inner.result_cache.as_ref() else {
        return;
    };
    if !request.result_cache_policy().write {
        return;
    }

    let snapshot = result.clone();
    let encoded = run_blocking(&inner.decode_limiter, move || encode_result(&snapshot)).await;
    let (png, metadata) = match encoded {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(key = %request.key(), error = %e, "Skipping result cache write");
            return;
        }
    };

    let stored = match inner.io_limiter.acquire().await {
        Ok(_permit) => cache.put(request.key(), &png, &metadata).await,
        Err(_) => return,
    };
    if let Err(e) = stored {
        warn!(key = %request.key(), error = %e, "Result cache write failed");
    }
}

// =============================================================================
// Download cache and fetch
// =============================================================================

async fn read_download_cache(
    inner: &EngineInner,
    request: &ImageRequest,
) -> Result<Option<Fetched>, LoadError> {
    let Some(cache) = inner.download_cache.as_ref() else {
        return Ok(None);
    };
    if !request.is_network() || !request.download_cache_policy().read {
        return Ok(None);
    }

    let download_key = request.download_key();
    let Some(snapshot) = cache.get(download_key.as_str()) else {
        return Ok(None);
    };

    let _permit = inner.io_limiter.acquire().await?;
    match snapshot.read_all().await {
        Ok(bytes) => {
            debug!(key = %download_key, size = bytes.len(), "Download cache hit");
            Ok(Some(Fetched {
                bytes,
                mime_type: None,
                data_from: DataFrom::DownloadCache,
            }))
        }
        Err(e) => {
            warn!(key = %download_key, error = %e, "Unreadable download cache entry, refetching");
            cache.remove(download_key.as_str());
            Ok(None)
        }
    }
}

async fn fetch(
    inner: &EngineInner,
    request: &ImageRequest,
    cancel: &CancelToken,
) -> Result<Fetched, LoadError> {
    let fetcher = inner.components.new_fetcher(request)?;
    let _permit = inner.io_limiter.acquire().await?;
    cancel.checkpoint()?;

    let fetched = fetcher.fetch().await?;
    let data_from = fetched.data_from;
    let mime_type = fetched.mime_type;

    let bytes = match fetched.source {
        DataSource::Stream {
            body,
            content_length,
        } => {
            let writer = open_download_writer(inner, request, data_from).await;
            read_stream(request, body, content_length, writer, cancel).await?
        }
        other => other
            .into_bytes()
            .await
            .map_err(|e| map_open_error(request.uri(), e))?,
    };

    trace!(uri = request.uri(), size = bytes.len(), %data_from, "Fetched");
    Ok(Fetched {
        bytes,
        mime_type,
        data_from,
    })
}

/// A writer for the download cache when this fetch should populate it.
async fn open_download_writer(
    inner: &EngineInner,
    request: &ImageRequest,
    data_from: DataFrom,
) -> Option<DiskCacheWriter> {
    let cache = inner.download_cache.as_ref()?;
    if data_from != DataFrom::Network || !request.download_cache_policy().write {
        return None;
    }
    match cache.put(request.download_key().as_str()).await {
        Ok(writer) => Some(writer),
        Err(e) => {
            warn!(uri = request.uri(), error = %e, "Download cache unavailable for this fetch");
            None
        }
    }
}

/// Drain `body`, teeing chunks into `writer` as they arrive.
///
/// A cache write failure drops the writer (discarding the staged file) and
/// the fetch carries on uncached.
async fn read_stream(
    request: &ImageRequest,
    mut body: ByteStream,
    content_length: Option<u64>,
    mut writer: Option<DiskCacheWriter>,
    cancel: &CancelToken,
) -> Result<Bytes, LoadError> {
    let capacity = content_length.unwrap_or(0).min(MAX_PREALLOCATION) as usize;
    let mut buffer = BytesMut::with_capacity(capacity);
    let listener = request.progress_listener();
    let mut completed = 0u64;

    while let Some(chunk) = body.next().await {
        cancel.checkpoint()?;
        let chunk = chunk.map_err(|e| LoadError::TransientNetwork {
            uri: request.uri().to_string(),
            message: e.to_string(),
        })?;

        let write_error = match writer.as_mut() {
            Some(w) => w.write(&chunk).await.err(),
            None => None,
        };
        if let Some(e) = write_error {
            warn!(uri = request.uri(), error = %e, "Download cache write failed, continuing uncached");
            writer = None;
        }

        buffer.extend_from_slice(&chunk);
        completed += chunk.len() as u64;
        if let Some(listener) = listener {
            listener.on_progress(content_length, completed);
        }
    }

    if let Some(writer) = writer {
        if let Err(e) = writer.commit().await {
            warn!(uri = request.uri(), error = %e, "Download cache commit failed");
        }
    }
    Ok(buffer.freeze())
}

// =============================================================================
// Decode
// =============================================================================

fn is_undecodable(error: &LoadError) -> bool {
    matches!(
        error,
        LoadError::DecodeMalformed(_)
            | LoadError::DecodeUnsupported(_)
            | LoadError::NoMatchingHandler { .. }
    )
}

/// Drop a cached download that cannot be decoded so the next load refetches.
fn discard_download(inner: &EngineInner, request: &ImageRequest) {
    let Some(cache) = inner.download_cache.as_ref() else {
        return;
    };
    let download_key = request.download_key();
    if cache.remove(download_key.as_str()) {
        debug!(key = %download_key, "Removed undecodable download");
    }
}

async fn decode(
    inner: &EngineInner,
    request: &ImageRequest,
    fetched: Fetched,
    cancel: &CancelToken,
) -> Result<DecodeResult, LoadError> {
    let header = &fetched.bytes[..fetched.bytes.len().min(SNIFF_LEN)];
    let decoder = inner
        .components
        .new_decoder(request, header, fetched.mime_type.as_deref())?;
    trace!(uri = request.uri(), decoder = decoder.name(), "Decoding");

    let input = DecodeInput {
        bytes: fetched.bytes,
        mime_type: fetched.mime_type,
        data_from: fetched.data_from,
    };
    let options = *request.options();
    let transformations = request.transformations().to_vec();
    let cancel = cancel.clone();
    run_blocking(&inner.decode_limiter, move || {
        let decoded = decoder.decode(input, &options, &cancel)?;
        apply_transformations(decoded, &transformations, &cancel)
    })
    .await
}
