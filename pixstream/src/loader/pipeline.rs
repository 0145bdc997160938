//! The fetch-decode pipeline.
//!
//! Per request: resolve the source (network URL vs. local path), consult
//! the cache tiers, fetch on miss, decode with a computed downsample
//! factor, store the result in both tiers, and report. Network bytes are
//! first written to an ephemeral per-worker temp file and promoted into
//! the shared disk slot only after the full body has arrived; a slow
//! download therefore never holds the cache hostage.

use crate::bitmap::Bitmap;
use crate::cache::{CacheError, CacheKey, ImageCache};
use crate::loader::decode::{
    compute_sample_size, is_gif, DecodeError, Decoder, ImageCrateDecoder,
};
use crate::net::{FetchError, HttpClient};
use crate::request::ImageRequest;
use crate::task::ForegroundExecutor;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Allocation cap for a single decode; `None` disables the cap.
    pub decode_max_alloc_bytes: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            decode_max_alloc_bytes: Some(256 * 1024 * 1024),
        }
    }
}

/// Which tier (or source) satisfied a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Memory cache hit.
    Memory,
    /// Disk cache hit.
    Disk,
    /// Fetched from the network this load.
    Network,
    /// Read from a local file.
    Local,
}

/// A successfully loaded image.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The decoded bitmap.
    pub bitmap: Arc<Bitmap>,
    /// Whether the source bytes carried an animated-image signature.
    ///
    /// Probed on the decode path; a memory hit returns the already
    /// decoded frame and reports `false`.
    pub is_animated: bool,
    /// Where the image came from.
    pub source: LoadSource,
}

/// Load failures, by taxonomy.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Transport failure; no cache mutation happened.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The bytes did not decode; the disk entry for the key was evicted.
    #[error("corrupt image data for {identity}: {reason}")]
    DecodeCorrupt {
        /// Request identity
        identity: String,
        /// Decoder failure detail
        reason: String,
    },

    /// Decoding hit the allocation cap; the disk entry was retained.
    ///
    /// The content was structurally fine and the environment was the
    /// limiting factor; the caller may retry with a smaller sample hint.
    #[error("decode memory pressure for {identity}: {reason}")]
    MemoryPressure {
        /// Request identity
        identity: String,
        /// Decoder failure detail
        reason: String,
    },

    /// A local source file was missing or unreadable.
    #[error("local I/O error for {identity}")]
    LocalIo {
        /// Request identity
        identity: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Disk cache infrastructure failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The request identity was empty.
    #[error("empty request identity")]
    InvalidIdentity,

    /// The load was cancelled before completion.
    #[error("load cancelled")]
    Cancelled,

    /// A background worker died unexpectedly.
    #[error("internal worker failure: {0}")]
    Internal(String),
}

/// Orchestrates resolve → fetch → decode → deliver for image requests.
pub struct ImageLoader<H: HttpClient, D: Decoder = ImageCrateDecoder> {
    http: H,
    decoder: Arc<D>,
    cache: Arc<ImageCache>,
    foreground: ForegroundExecutor,
}

impl<H: HttpClient> ImageLoader<H> {
    /// Create a loader with the default decoder.
    pub fn new(http: H, cache: Arc<ImageCache>, foreground: ForegroundExecutor) -> Self {
        Self::with_decoder(http, ImageCrateDecoder::default(), cache, foreground)
    }

    /// Create a loader from configuration.
    pub fn with_config(
        http: H,
        cache: Arc<ImageCache>,
        foreground: ForegroundExecutor,
        config: LoaderConfig,
    ) -> Self {
        Self::with_decoder(
            http,
            ImageCrateDecoder::new(config.decode_max_alloc_bytes),
            cache,
            foreground,
        )
    }
}

impl<H: HttpClient, D: Decoder + 'static> ImageLoader<H, D> {
    /// Create a loader with an injected decoder.
    pub fn with_decoder(
        http: H,
        decoder: D,
        cache: Arc<ImageCache>,
        foreground: ForegroundExecutor,
    ) -> Self {
        Self {
            http,
            decoder: Arc::new(decoder),
            cache,
            foreground,
        }
    }

    /// The cache this loader populates.
    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// The foreground executor results are delivered on.
    pub(crate) fn foreground(&self) -> &ForegroundExecutor {
        &self.foreground
    }

    /// Load an image, consulting both cache tiers.
    pub async fn load(&self, request: &ImageRequest) -> Result<LoadedImage, LoadError> {
        self.load_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Load an image, observing a cooperative cancellation token.
    ///
    /// The token is checked between pipeline stages; work already in
    /// flight (a socket read, a decode) runs to completion.
    pub async fn load_cancellable(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, LoadError> {
        if request.identity().trim().is_empty() {
            return Err(LoadError::InvalidIdentity);
        }
        let key = request.key();

        // Memory tier first; never blocks on disk.
        if let Some(bitmap) = self.cache.get_bitmap(&key) {
            debug!(identity = request.identity(), "memory cache hit");
            return Ok(LoadedImage {
                bitmap,
                is_animated: false,
                source: LoadSource::Memory,
            });
        }

        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        // Disk tier.
        if let Some(bytes) = self.read_disk_entry(&key).await? {
            debug!(identity = request.identity(), "disk cache hit");
            return self
                .decode_and_store(request, &key, bytes, LoadSource::Disk, cancel)
                .await;
        }

        if request.is_network() {
            self.fetch_to_disk_cache(request, &key, cancel).await?;

            let bytes = self.read_disk_entry(&key).await?.ok_or_else(|| {
                LoadError::Cache(CacheError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "promoted disk entry missing after download",
                )))
            })?;
            self.decode_and_store(request, &key, bytes, LoadSource::Network, cancel)
                .await
        } else {
            // Local file: the source is already durable, no disk-cache
            // write needed.
            let path = request.identity().to_string();
            let read = run_blocking(move || std::fs::read(&path)).await?;
            let bytes = read.map_err(|err| LoadError::LocalIo {
                identity: request.identity().to_string(),
                source: err,
            })?;
            self.decode_and_store(request, &key, bytes, LoadSource::Local, cancel)
                .await
        }
    }

    /// Read the full disk entry for a key, if present.
    ///
    /// An unreadable entry is treated as a miss so the pipeline falls
    /// through to a fresh fetch.
    async fn read_disk_entry(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, LoadError> {
        let cache = Arc::clone(&self.cache);
        let key = key.clone();

        run_blocking(move || {
            let mut stream = cache.get_stream_from_disk(&key)?;
            let mut bytes = Vec::new();
            match stream.read_to_end(&mut bytes) {
                Ok(_) => Some(bytes),
                Err(err) => {
                    warn!(key = %key, error = %err, "disk entry unreadable; treating as miss");
                    None
                }
            }
        })
        .await
    }

    /// Download the request body into the disk cache.
    ///
    /// The body streams into a per-worker temp file; only a fully
    /// downloaded body is promoted into the shared cache slot. The temp
    /// file is removed on every exit path.
    async fn fetch_to_disk_cache(
        &self,
        request: &ImageRequest,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let temp_path = self.cache.reserve_temp_path(key);
        let mut dest = tokio::fs::File::create(&temp_path)
            .await
            .map_err(FetchError::Io)?;

        let downloaded = self
            .http
            .download_to_stream(request.identity(), request.headers(), &mut dest)
            .await;
        drop(dest);

        let bytes = match downloaded {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(err.into());
            }
        };
        debug!(identity = request.identity(), bytes, "download complete");

        let cache = Arc::clone(&self.cache);
        let key = key.clone();
        let promoted = run_blocking(move || {
            let result = std::fs::File::open(&temp_path)
                .map(|mut file| cache.add_stream_to_disk(&key, &mut file))
                .unwrap_or(false);
            let _ = std::fs::remove_file(&temp_path);
            result
        })
        .await?;

        if promoted {
            Ok(())
        } else {
            Err(LoadError::Cache(CacheError::Io(io::Error::new(
                io::ErrorKind::Other,
                "failed to promote download into disk cache",
            ))))
        }
    }

    /// Decode fetched bytes and store the bitmap in the memory tier.
    async fn decode_and_store(
        &self,
        request: &ImageRequest,
        key: &CacheKey,
        bytes: Vec<u8>,
        source: LoadSource,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, LoadError> {
        // Last checkpoint before the expensive part.
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let is_animated = request.animated_ok() && is_gif(&bytes);
        let decoder = Arc::clone(&self.decoder);
        let hint = request.max_dimensions();

        let decoded = run_blocking(move || {
            let (width, height) = decoder.probe_dimensions(&bytes)?;
            let sample = compute_sample_size(width, height, hint);
            decoder.decode(&bytes, sample)
        })
        .await?;

        match decoded {
            Ok(bitmap) => {
                let bitmap = Arc::new(bitmap);
                self.cache.add_bitmap(key.clone(), Arc::clone(&bitmap));
                Ok(LoadedImage {
                    bitmap,
                    is_animated,
                    source,
                })
            }
            Err(DecodeError::Corrupt(reason)) => {
                // Only cache-backed bytes can poison future loads; a bad
                // local file has no disk entry to evict.
                if matches!(source, LoadSource::Disk | LoadSource::Network) {
                    warn!(
                        identity = request.identity(),
                        reason, "corrupt cached image; evicting disk entry"
                    );
                    let cache = Arc::clone(&self.cache);
                    let key = key.clone();
                    run_blocking(move || cache.remove_from_disk(&key)).await?;
                }
                Err(LoadError::DecodeCorrupt {
                    identity: request.identity().to_string(),
                    reason,
                })
            }
            Err(DecodeError::MemoryLimit(reason)) => Err(LoadError::MemoryPressure {
                identity: request.identity().to_string(),
                reason,
            }),
        }
    }
}

impl<H: HttpClient, D: Decoder> std::fmt::Debug for ImageLoader<H, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("cache", &self.cache)
            .finish()
    }
}

/// Run synchronous work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, LoadError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| LoadError::Internal(err.to_string()))
}
