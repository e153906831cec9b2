//! Disk tier for post-processed decode results.
//!
//! A transformed bitmap is stored PNG-encoded under the request key, next to a
//! `<key>\0_metadata` JSON entry describing the source and the transformations.
//! An entry is usable only when both parts are present and consistent.

use std::sync::Arc;

use bytes::Bytes;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::disk::DiskCache;
use crate::decode::{Bitmap, DecodeResult, ImageInfo};
use crate::error::{CacheError, LoadError};
use crate::fetch::DataFrom;
use crate::request::RequestKey;

/// NUL-prefixed like the key parameters, so no request key can collide with it
const METADATA_SUFFIX: &str = "\0_metadata";

/// Sidecar stored with every result payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub image_info: ImageInfo,
    pub sample_size: u32,
    pub transformations: Vec<String>,
    pub width: u32,
    pub height: u32,
}

/// A result payload read back from disk, not yet decoded.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub png: Bytes,
    pub metadata: ResultMetadata,
}

impl CachedResult {
    /// Decode the stored PNG. CPU-bound.
    pub fn into_decode_result(self) -> Result<DecodeResult, LoadError> {
        let image = image::load_from_memory_with_format(&self.png, ImageFormat::Png)
            .map_err(|e| LoadError::DecodeMalformed(format!("result cache payload: {e}")))?;
        if (image.width(), image.height()) != (self.metadata.width, self.metadata.height) {
            return Err(LoadError::DecodeMalformed(format!(
                "result cache payload is {}x{}, metadata says {}x{}",
                image.width(),
                image.height(),
                self.metadata.width,
                self.metadata.height
            )));
        }
        Ok(DecodeResult {
            bitmap: Arc::new(Bitmap::new(image)),
            image_info: self.metadata.image_info,
            data_from: DataFrom::ResultCache,
            sample_size: self.metadata.sample_size,
            transformations: self.metadata.transformations,
            source_size: self.png.len() as u64,
        })
    }
}

/// PNG encoding of a decode result plus its sidecar. CPU-bound.
pub fn encode_result(result: &DecodeResult) -> Result<(Vec<u8>, ResultMetadata), LoadError> {
    let png = result.bitmap.encode_png()?;
    let metadata = ResultMetadata {
        image_info: result.image_info.clone(),
        sample_size: result.sample_size,
        transformations: result.transformations.clone(),
        width: result.bitmap.width(),
        height: result.bitmap.height(),
    };
    Ok((png, metadata))
}

/// Result tier over a dedicated [`DiskCache`].
#[derive(Debug, Clone)]
pub struct ResultCache {
    disk: DiskCache,
}

impl ResultCache {
    pub fn new(disk: DiskCache) -> Self {
        Self { disk }
    }

    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }

    fn metadata_key(key: &RequestKey) -> String {
        format!("{}{}", key.as_str(), METADATA_SUFFIX)
    }

    /// Read both parts for `key`. Any inconsistency is a miss and removes
    /// the entry.
    pub async fn get(&self, key: &RequestKey) -> Option<CachedResult> {
        let metadata_key = Self::metadata_key(key);
        let metadata_snapshot = self.disk.get(&metadata_key)?;
        let Some(payload_snapshot) = self.disk.get(key.as_str()) else {
            self.disk.remove(&metadata_key);
            return None;
        };

        let metadata = metadata_snapshot
            .read_all()
            .await
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<ResultMetadata>(&bytes).map_err(|e| e.to_string())
            });
        let png = payload_snapshot.read_all().await;

        match (metadata, png) {
            (Ok(metadata), Ok(png)) => Some(CachedResult { png, metadata }),
            (metadata, png) => {
                warn!(
                    key = %key,
                    metadata_error = ?metadata.err(),
                    payload_error = ?png.err().map(|e| e.to_string()),
                    "Discarding unreadable result cache entry"
                );
                self.remove(key);
                None
            }
        }
    }

    /// Store an encoded result. The payload is committed before the sidecar,
    /// so a reader never finds metadata without its payload.
    pub async fn put(
        &self,
        key: &RequestKey,
        png: &[u8],
        metadata: &ResultMetadata,
    ) -> Result<(), CacheError> {
        let sidecar = serde_json::to_vec(metadata).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        self.disk.put_bytes(key.as_str(), png).await?;
        if let Err(e) = self.disk.put_bytes(&Self::metadata_key(key), &sidecar).await {
            self.disk.remove(key.as_str());
            return Err(e);
        }
        debug!(key = %key, size = png.len(), "Stored result cache entry");
        Ok(())
    }

    pub fn remove(&self, key: &RequestKey) -> bool {
        let payload = self.disk.remove(key.as_str());
        let metadata = self.disk.remove(&Self::metadata_key(key));
        payload || metadata
    }
}
