//! Core types for the cache system.

use std::path::PathBuf;
use thiserror::Error;

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Memory cache configuration.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum resident size of decoded bitmaps in bytes (default: 64 MB)
    pub max_size_bytes: usize,
}

impl MemoryCacheConfig {
    /// Size the budget as a fraction of an available-memory figure.
    ///
    /// Fractions outside `0.05..=0.8` are rejected; a budget that small
    /// thrashes and one that large starves the rest of the process.
    pub fn fraction_of(available_bytes: usize, fraction: f64) -> Result<Self, CacheError> {
        if !(0.05..=0.8).contains(&fraction) {
            return Err(CacheError::InvalidConfig(format!(
                "memory fraction must be between 0.05 and 0.8, got {fraction}"
            )));
        }
        Ok(Self {
            max_size_bytes: (available_bytes as f64 * fraction) as usize,
        })
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// Disk cache configuration.
///
/// The disk tier has no automatic eviction; entries live until they are
/// individually removed or the tier is cleared.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Cache directory
    pub cache_dir: PathBuf,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pixstream");

        Self { cache_dir }
    }
}

/// Complete cache system configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Memory cache configuration
    pub memory: MemoryCacheConfig,
    /// Disk cache configuration
    pub disk: DiskCacheConfig,
}

impl CacheConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set memory cache size in bytes.
    pub fn with_memory_size(mut self, size: usize) -> Self {
        self.memory.max_size_bytes = size;
        self
    }

    /// Set cache directory.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.disk.cache_dir = dir;
        self
    }
}
