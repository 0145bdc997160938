//! Disk-backed byte cache.
//!
//! Entries are flat files named by the request's [`CacheKey`] hex digest.
//! Writes go to a per-worker temporary file first and are renamed onto the
//! final slot only once the copy has fully succeeded, so readers never see
//! a partially written entry and a slow writer never blocks other readers
//! behind a directory-wide lock.
//!
//! There is no automatic eviction on this tier; entries live until they
//! are individually removed (corruption eviction) or the tier is cleared.

use crate::cache::key::CacheKey;
use crate::cache::stats::CacheStats;
use crate::cache::types::CacheError;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Process-wide sequence for temp file worker ids.
///
/// Ids only need to be unique among live writers sharing one cache
/// directory within a process lifetime.
static WORKER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Copy buffer size for stream-to-file writes.
const COPY_BUF_SIZE: usize = 8 * 1024;

/// Disk cache for fetched image bytes.
pub struct DiskCache {
    cache_dir: PathBuf,
    stats: Mutex<CacheStats>,
}

impl DiskCache {
    /// Create a new disk cache rooted at `cache_dir`.
    ///
    /// The directory is created if it does not exist, so it is ready
    /// before the first write.
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        Ok(Self {
            cache_dir,
            stats: Mutex::new(CacheStats::new()),
        })
    }

    /// The cache directory.
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path of the final cache slot for a key.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.as_hex())
    }

    /// Reserve an ephemeral download destination for a key.
    ///
    /// Each call yields a distinct `<hex>_temp_<worker>` path, so
    /// concurrent fetchers sharing the directory cannot collide. The
    /// caller owns the file and must delete it when done.
    pub fn reserve_temp_path(&self, key: &CacheKey) -> PathBuf {
        let worker_id = WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
        self.cache_dir.join(key.temp_file_name(worker_id))
    }

    /// Open the backing file for a key.
    ///
    /// Returns `None` on miss; a miss is not an error.
    pub fn get_stream(&self, key: &CacheKey) -> Option<File> {
        match File::open(self.entry_path(key)) {
            Ok(file) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_disk_hit();
                }
                Some(file)
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(key = %key, error = %err, "disk cache read failed");
                }
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_disk_miss();
                }
                None
            }
        }
    }

    /// Copy a stream fully into the cache slot for a key.
    ///
    /// The bytes land in a per-worker temp file which is renamed onto the
    /// final slot after the copy completes. Fails soft: an I/O error or an
    /// empty stream returns `false` and leaves no entry (and no temp file)
    /// behind.
    pub fn add_stream(&self, key: &CacheKey, reader: &mut dyn Read) -> bool {
        let temp_path = self.reserve_temp_path(key);
        let final_path = self.entry_path(key);

        let result = self.copy_and_promote(reader, &temp_path, &final_path);

        match result {
            Ok(size) => {
                debug!(key = %key, size, "disk cache entry written");
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_disk_write();
                }
                true
            }
            Err(err) => {
                warn!(key = %key, error = %err, "disk cache write failed");
                let _ = fs::remove_file(&temp_path);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_disk_write_failure();
                }
                false
            }
        }
    }

    /// Best-effort removal of the entry for a key.
    ///
    /// Ignored if absent. This is the corruption-eviction entry point.
    pub fn remove(&self, key: &CacheKey) {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => {
                debug!(key = %key, "disk cache entry removed");
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_disk_removal();
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(key = %key, error = %err, "disk cache removal failed"),
        }
    }

    /// Check whether an entry exists for a key.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Remove every entry, including stale temp files.
    pub fn clear(&self) -> Result<(), CacheError> {
        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    /// Walk the directory and report `(entry_count, total_bytes)`.
    ///
    /// Temp files are in-flight downloads, not entries, and are skipped.
    pub fn scan(&self) -> Result<(usize, u64), CacheError> {
        let mut count = 0;
        let mut total = 0u64;

        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().contains("_temp_") {
                continue;
            }
            total += entry.metadata()?.len();
            count += 1;
        }

        Ok((count, total))
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }

    fn copy_and_promote(
        &self,
        reader: &mut dyn Read,
        temp_path: &Path,
        final_path: &Path,
    ) -> io::Result<u64> {
        let mut out = File::create(temp_path)?;

        let mut buf = [0u8; COPY_BUF_SIZE];
        let mut size = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            size += n as u64;
        }

        if size == 0 {
            // An empty entry would poison every future decode for the key.
            drop(out);
            let _ = fs::remove_file(temp_path);
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "refusing to cache empty stream",
            ));
        }

        out.flush()?;
        drop(out);
        fs::rename(temp_path, final_path)?;
        Ok(size)
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn create_temp_cache() -> (DiskCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path().to_path_buf()).unwrap();
        (cache, temp_dir)
    }

    fn test_key(n: u32) -> CacheKey {
        CacheKey::for_identity(&format!("https://example.com/{n}.png"))
    }

    fn read_all(mut file: File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_disk_cache_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested").join("cache");

        let cache = DiskCache::new(dir.clone()).unwrap();
        assert!(dir.is_dir());
        assert_eq!(cache.dir(), dir);
    }

    #[test]
    fn test_disk_cache_round_trip() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);
        let data = b"not really an image, but bytes are bytes".to_vec();

        assert!(cache.add_stream(&key, &mut Cursor::new(data.clone())));

        let stream = cache.get_stream(&key).expect("entry should exist");
        assert_eq!(read_all(stream), data);
    }

    #[test]
    fn test_disk_cache_miss_is_none() {
        let (cache, _temp) = create_temp_cache();
        assert!(cache.get_stream(&test_key(1)).is_none());
    }

    #[test]
    fn test_disk_cache_contains() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);

        assert!(!cache.contains(&key));
        cache.add_stream(&key, &mut Cursor::new(vec![1, 2, 3]));
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_disk_cache_rejects_empty_stream() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);

        assert!(!cache.add_stream(&key, &mut Cursor::new(Vec::new())));
        assert!(!cache.contains(&key));
        assert_eq!(cache.stats().disk_write_failures, 1);
    }

    #[test]
    fn test_disk_cache_no_temp_left_behind() {
        let (cache, temp) = create_temp_cache();
        let key = test_key(1);

        cache.add_stream(&key, &mut Cursor::new(vec![1, 2, 3]));
        cache.add_stream(&key, &mut Cursor::new(Vec::new())); // failed write

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains("_temp_"))
            .collect();
        assert!(leftovers.is_empty(), "temp files leaked: {leftovers:?}");
    }

    #[test]
    fn test_disk_cache_overwrite() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);

        cache.add_stream(&key, &mut Cursor::new(b"first".to_vec()));
        cache.add_stream(&key, &mut Cursor::new(b"second".to_vec()));

        let stream = cache.get_stream(&key).unwrap();
        assert_eq!(read_all(stream), b"second");
    }

    #[test]
    fn test_disk_cache_remove() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);

        cache.add_stream(&key, &mut Cursor::new(vec![1, 2, 3]));
        cache.remove(&key);

        assert!(!cache.contains(&key));
        assert!(cache.get_stream(&key).is_none());
        assert_eq!(cache.stats().disk_removals, 1);
    }

    #[test]
    fn test_disk_cache_remove_absent_is_noop() {
        let (cache, _temp) = create_temp_cache();
        cache.remove(&test_key(1));
        assert_eq!(cache.stats().disk_removals, 0);
    }

    #[test]
    fn test_disk_cache_clear() {
        let (cache, _temp) = create_temp_cache();
        cache.add_stream(&test_key(1), &mut Cursor::new(vec![1]));
        cache.add_stream(&test_key(2), &mut Cursor::new(vec![2]));

        cache.clear().unwrap();
        assert!(!cache.contains(&test_key(1)));
        assert!(!cache.contains(&test_key(2)));
    }

    #[test]
    fn test_disk_cache_scan_skips_temp_files() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);

        cache.add_stream(&key, &mut Cursor::new(vec![0u8; 100]));

        // Simulate an in-flight download.
        let temp_path = cache.reserve_temp_path(&test_key(2));
        fs::write(&temp_path, vec![0u8; 50]).unwrap();

        let (count, size) = cache.scan().unwrap();
        assert_eq!(count, 1);
        assert_eq!(size, 100);
    }

    #[test]
    fn test_disk_cache_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let key = test_key(1);

        {
            let cache = DiskCache::new(dir.clone()).unwrap();
            cache.add_stream(&key, &mut Cursor::new(b"durable".to_vec()));
        }

        let cache = DiskCache::new(dir).unwrap();
        let stream = cache.get_stream(&key).unwrap();
        assert_eq!(read_all(stream), b"durable");
    }

    #[test]
    fn test_reserve_temp_path_is_unique() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);

        let a = cache.reserve_temp_path(&key);
        let b = cache.reserve_temp_path(&key);
        assert_ne!(a, b);
    }

    #[test]
    fn test_disk_cache_statistics() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key(1);

        cache.get_stream(&key);
        cache.add_stream(&key, &mut Cursor::new(vec![1, 2, 3]));
        cache.get_stream(&key);

        let stats = cache.stats();
        assert_eq!(stats.disk_misses, 1);
        assert_eq!(stats.disk_writes, 1);
        assert_eq!(stats.disk_hits, 1);
    }
}
