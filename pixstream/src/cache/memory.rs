//! In-memory bitmap cache with LRU eviction.

use crate::bitmap::Bitmap;
use crate::cache::key::CacheKey;
use crate::cache::stats::CacheStats;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Entry in the memory cache.
#[derive(Debug, Clone)]
struct MemoryEntry {
    /// Decoded bitmap
    bitmap: Arc<Bitmap>,
    /// Last access time for LRU eviction
    last_accessed: Instant,
}

impl MemoryEntry {
    fn new(bitmap: Arc<Bitmap>) -> Self {
        Self {
            bitmap,
            last_accessed: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Interior state guarded by one mutex.
///
/// The map and the running size total must change together, so they share
/// a lock rather than being independently synchronized.
#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<CacheKey, MemoryEntry>,
    size_bytes: usize,
}

/// In-memory cache of decoded bitmaps.
///
/// Bounded by a byte budget; inserting past the budget evicts the least
/// recently accessed entries first. Safe to share across background tasks.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    max_size_bytes: usize,
    stats: Mutex<CacheStats>,
}

impl MemoryCache {
    /// Create a new memory cache with the given byte budget.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_size_bytes,
            stats: Mutex::new(CacheStats::new()),
        }
    }

    /// Get a cached bitmap.
    ///
    /// Updates recency and statistics on hit.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Bitmap>> {
        let mut state = self.state.lock().unwrap();

        if let Some(entry) = state.entries.get_mut(key) {
            entry.touch();
            let bitmap = Arc::clone(&entry.bitmap);

            if let Ok(mut stats) = self.stats.lock() {
                stats.record_memory_hit();
            }
            Some(bitmap)
        } else {
            if let Ok(mut stats) = self.stats.lock() {
                stats.record_memory_miss();
            }
            None
        }
    }

    /// Put a bitmap into the cache, overwriting any previous entry.
    ///
    /// Evicts least recently used entries first if the insert would push
    /// the cache over its byte budget. Never touches disk.
    pub fn put(&self, key: CacheKey, bitmap: Arc<Bitmap>) {
        let incoming = bitmap.byte_size();
        let mut state = self.state.lock().unwrap();

        // Replacing an entry releases its bytes before budget accounting.
        if let Some(old) = state.entries.remove(&key) {
            state.size_bytes -= old.bitmap.byte_size();
        }

        let evicted = Self::evict_until_fits(&mut state, self.max_size_bytes, incoming);

        state.entries.insert(key, MemoryEntry::new(bitmap));
        state.size_bytes += incoming;

        if let Ok(mut stats) = self.stats.lock() {
            if evicted > 0 {
                stats.record_memory_eviction(evicted);
            }
            stats.update_memory_size(state.size_bytes, state.entries.len());
        }
    }

    /// Remove a single entry, if present.
    pub fn remove(&self, key: &CacheKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.remove(key) {
            state.size_bytes -= entry.bitmap.byte_size();
            if let Ok(mut stats) = self.stats.lock() {
                stats.update_memory_size(state.size_bytes, state.entries.len());
            }
        }
    }

    /// Check if a key exists in the cache without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let state = self.state.lock().unwrap();
        state.entries.contains_key(key)
    }

    /// Current number of entries.
    pub fn entry_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.entries.len()
    }

    /// Current resident size in bytes.
    pub fn size_bytes(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.size_bytes
    }

    /// Configured byte budget.
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.entries.clear();
        state.size_bytes = 0;

        if let Ok(mut stats) = self.stats.lock() {
            stats.update_memory_size(0, 0);
        }
    }

    /// Evict oldest entries until `incoming` bytes fit under the budget.
    ///
    /// Returns the number of evicted entries. An entry larger than the
    /// whole budget empties the cache and is admitted anyway; refusing it
    /// would make oversized images uncacheable rather than merely costly.
    fn evict_until_fits(state: &mut MemoryState, budget: usize, incoming: usize) -> u64 {
        if state.size_bytes + incoming <= budget {
            return 0;
        }

        let mut by_age: Vec<(CacheKey, Instant, usize)> = state
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_accessed, e.bitmap.byte_size()))
            .collect();
        by_age.sort_by_key(|(_, accessed, _)| *accessed);

        let mut evicted = 0;
        for (key, _, size) in by_age {
            if state.size_bytes + incoming <= budget {
                break;
            }
            state.entries.remove(&key);
            state.size_bytes -= size;
            evicted += 1;
        }
        evicted
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_size_bytes", &self.max_size_bytes)
            .field("size_bytes", &self.size_bytes())
            .field("entry_count", &self.entry_count())
            .finish()
    }
}
