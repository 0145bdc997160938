//! Two-tier image cache.
//!
//! Decoded bitmaps live in a byte-budgeted in-memory LRU tier; fetched
//! image bytes live in a disk tier keyed by the same stable hash of the
//! request identity. A request may hit or miss independently at each
//! tier. [`ImageCache`] is the façade the loader pipeline drives.

mod disk;
mod key;
mod memory;
mod stats;
mod types;

pub use disk::DiskCache;
pub use key::CacheKey;
pub use memory::MemoryCache;
pub use stats::CacheStats;
pub use types::{CacheConfig, CacheError, DiskCacheConfig, MemoryCacheConfig};

use crate::bitmap::Bitmap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The two-tier cache façade.
///
/// Memory operations are O(1) and never block on disk I/O; disk
/// operations are synchronous and expected to run on a background
/// context.
pub struct ImageCache {
    memory: MemoryCache,
    disk: DiskCache,
}

impl ImageCache {
    /// Create a cache from configuration.
    ///
    /// Ensures the disk cache directory exists before the first write.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Ok(Self {
            memory: MemoryCache::new(config.memory.max_size_bytes),
            disk: DiskCache::new(config.disk.cache_dir)?,
        })
    }

    /// Memory-tier lookup; updates recency.
    pub fn get_bitmap(&self, key: &CacheKey) -> Option<Arc<Bitmap>> {
        self.memory.get(key)
    }

    /// Insert (or overwrite) a decoded bitmap in the memory tier.
    ///
    /// Evicts least-recently-used entries when over budget. Never blocks
    /// on disk I/O.
    pub fn add_bitmap(&self, key: CacheKey, bitmap: Arc<Bitmap>) {
        self.memory.put(key, bitmap);
    }

    /// Remove a bitmap from the memory tier only.
    pub fn remove_bitmap(&self, key: &CacheKey) {
        self.memory.remove(key);
    }

    /// Open the disk-tier entry for a key; `None` on miss.
    pub fn get_stream_from_disk(&self, key: &CacheKey) -> Option<File> {
        self.disk.get_stream(key)
    }

    /// Copy a stream fully into the disk tier.
    ///
    /// Atomic relative to readers (temp write + rename); returns `false`
    /// on I/O failure.
    pub fn add_stream_to_disk(&self, key: &CacheKey, reader: &mut dyn Read) -> bool {
        self.disk.add_stream(key, reader)
    }

    /// Check the disk tier for an entry.
    pub fn contains_in_disk(&self, key: &CacheKey) -> bool {
        self.disk.contains(key)
    }

    /// Best-effort removal of the disk entry for a key.
    pub fn remove_from_disk(&self, key: &CacheKey) {
        self.disk.remove(key);
    }

    /// Reserve an ephemeral download path inside the cache directory.
    pub fn reserve_temp_path(&self, key: &CacheKey) -> PathBuf {
        self.disk.reserve_temp_path(key)
    }

    /// The disk cache directory.
    pub fn disk_cache_dir(&self) -> &Path {
        self.disk.dir()
    }

    /// Clear the memory tier.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    /// Clear the disk tier.
    pub fn clear_disk(&self) -> Result<(), CacheError> {
        self.disk.clear()
    }

    /// Merged statistics snapshot across both tiers.
    pub fn stats(&self) -> CacheStats {
        let mem = self.memory.stats();
        let disk = self.disk.stats();
        CacheStats {
            memory_hits: mem.memory_hits,
            memory_misses: mem.memory_misses,
            memory_size_bytes: mem.memory_size_bytes,
            memory_entry_count: mem.memory_entry_count,
            memory_evictions: mem.memory_evictions,
            disk_hits: disk.disk_hits,
            disk_misses: disk.disk_misses,
            disk_writes: disk.disk_writes,
            disk_write_failures: disk.disk_write_failures,
            disk_removals: disk.disk_removals,
        }
    }

    /// Disk tier usage: `(entry_count, total_bytes)`.
    pub fn disk_usage(&self) -> Result<(usize, u64), CacheError> {
        self.disk.scan()
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .finish()
    }
}
