//! Cache tiers.
//!
//! - [`MemoryCache`]: decoded bitmaps, LRU with reference counting
//! - [`DiskCache`]: raw bytes, durable LRU with atomic staged writes
//! - [`ResultCache`]: transformed results, PNG-encoded on a second disk cache
//!
//! Cache failures never fail a request: an unreadable entry is a miss and a
//! failed write is skipped with a warning.

mod disk;
mod memory;
mod result;

pub use disk::{DiskCache, DiskCacheStats, DiskCacheWriter, DiskSnapshot, DEFAULT_DISK_CACHE_CAPACITY};
pub use memory::{CachedImage, MemoryCache, MemoryCacheStats, MemoryLease, DEFAULT_MEMORY_CACHE_CAPACITY};
pub use result::{encode_result, CachedResult, ResultCache, ResultMetadata};
