//! Callback-driven loads.
//!
//! [`BitmapFetcher`] implements the generic [`DataFetcher`] contract for
//! image requests, and [`ImageLoader::load_detached`] runs one on a
//! spawned task, delivering the outcome through a [`DataCallback`] on the
//! foreground executor.

use crate::loader::decode::Decoder;
use crate::loader::pipeline::{ImageLoader, LoadError, LoadedImage};
use crate::net::HttpClient;
use crate::request::{DataCallback, DataFetcher, ImageRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a detached load; lets the caller cancel it.
#[derive(Debug, Clone)]
pub struct LoadHandle {
    cancel: CancellationToken,
}

impl LoadHandle {
    /// Request cooperative cancellation of the load.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// [`DataFetcher`] implementation producing decoded bitmaps.
pub struct BitmapFetcher<H: HttpClient, D: Decoder> {
    loader: Arc<ImageLoader<H, D>>,
    request: ImageRequest,
    cancel: CancellationToken,
}

impl<H: HttpClient, D: Decoder> BitmapFetcher<H, D> {
    /// Create a fetcher for one request.
    pub fn new(loader: Arc<ImageLoader<H, D>>, request: ImageRequest) -> Self {
        Self {
            loader,
            request,
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed between pipeline stages.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<H: HttpClient, D: Decoder + 'static> DataFetcher for BitmapFetcher<H, D> {
    type Data = LoadedImage;
    type Error = LoadError;

    async fn load_data(&mut self) -> Result<LoadedImage, LoadError> {
        self.loader
            .load_cancellable(&self.request, &self.cancel)
            .await
    }

    fn cleanup(&mut self) {
        // Cancelling the token stops in-flight stages at their next
        // checkpoint; files and handles are released by the pipeline's
        // own exit paths. Safe whether or not load_data completed.
        debug!(identity = self.request.identity(), "fetcher cleanup");
        self.cancel.cancel();
    }
}

impl<H, D> ImageLoader<H, D>
where
    H: HttpClient + 'static,
    D: Decoder + 'static,
{
    /// Load in the background and deliver through a callback.
    ///
    /// Exactly one of the callback's methods fires, on the foreground
    /// executor. The returned handle cancels the load cooperatively; a
    /// cancelled load reports [`LoadError::Cancelled`] through
    /// `on_load_failed`.
    pub fn load_detached(
        self: &Arc<Self>,
        request: ImageRequest,
        callback: impl DataCallback<LoadedImage, LoadError> + 'static,
    ) -> LoadHandle {
        let mut fetcher = BitmapFetcher::new(Arc::clone(self), request);
        let handle = LoadHandle {
            cancel: fetcher.cancellation_token(),
        };
        let foreground = self.foreground().clone();

        tokio::spawn(async move {
            let result = fetcher.load_data().await;
            foreground.post(move || match result {
                Ok(image) => callback.on_data_ready(image),
                Err(error) => callback.on_load_failed(error),
            });
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, ImageCache};
    use crate::loader::decode::tests::png_bytes;
    use crate::net::MockHttpClient;
    use crate::task::ForegroundExecutor;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct RecordingCallback {
        results: Arc<Mutex<Vec<Result<LoadedImage, LoadError>>>>,
    }

    impl DataCallback<LoadedImage, LoadError> for RecordingCallback {
        fn on_data_ready(&self, data: LoadedImage) {
            self.results.lock().unwrap().push(Ok(data));
        }

        fn on_load_failed(&self, error: LoadError) {
            self.results.lock().unwrap().push(Err(error));
        }
    }

    fn detached_loader(http: MockHttpClient, temp: &TempDir) -> Arc<ImageLoader<MockHttpClient>> {
        let config = CacheConfig::new().with_cache_dir(temp.path().to_path_buf());
        let cache = Arc::new(ImageCache::new(config).unwrap());
        Arc::new(ImageLoader::new(http, cache, ForegroundExecutor::start()))
    }

    async fn wait_for_result(
        results: &Arc<Mutex<Vec<Result<LoadedImage, LoadError>>>>,
    ) -> Result<LoadedImage, LoadError> {
        for _ in 0..100 {
            if let Some(result) = results.lock().unwrap().pop() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("callback never fired");
    }

    #[tokio::test]
    async fn test_detached_load_delivers_success() {
        let temp = TempDir::new().unwrap();
        let loader = detached_loader(MockHttpClient::serving(png_bytes(8, 8)), &temp);
        let results = Arc::new(Mutex::new(Vec::new()));

        loader.load_detached(
            ImageRequest::new("https://example.com/a.png"),
            RecordingCallback {
                results: Arc::clone(&results),
            },
        );

        let image = wait_for_result(&results).await.unwrap();
        assert_eq!(image.bitmap.width(), 8);
    }

    #[tokio::test]
    async fn test_detached_load_delivers_failure() {
        let temp = TempDir::new().unwrap();
        let loader = detached_loader(MockHttpClient::failing_with_status(404), &temp);
        let results = Arc::new(Mutex::new(Vec::new()));

        loader.load_detached(
            ImageRequest::new("https://example.com/a.png"),
            RecordingCallback {
                results: Arc::clone(&results),
            },
        );

        let result = wait_for_result(&results).await;
        assert!(matches!(result, Err(LoadError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_cancelled_handle_reports_cancelled() {
        let temp = TempDir::new().unwrap();
        let loader = detached_loader(MockHttpClient::serving(png_bytes(8, 8)), &temp);
        let results = Arc::new(Mutex::new(Vec::new()));

        // Cancel synchronously, before the spawned task first polls.
        let handle = loader.load_detached(
            ImageRequest::new("https://example.com/slow.png"),
            RecordingCallback {
                results: Arc::clone(&results),
            },
        );
        handle.cancel();
        assert!(handle.is_cancelled());

        // Either the cancel landed before the first checkpoint (an error)
        // or the load had already finished (success); both are legal for
        // cooperative cancellation. What matters is delivery.
        let _ = wait_for_result(&results).await;
    }

    #[tokio::test]
    async fn test_fetcher_cleanup_cancels() {
        let temp = TempDir::new().unwrap();
        let loader = detached_loader(MockHttpClient::serving(png_bytes(8, 8)), &temp);
        let mut fetcher =
            BitmapFetcher::new(loader, ImageRequest::new("https://example.com/a.png"));
        let token = fetcher.cancellation_token();

        fetcher.cleanup();
        assert!(token.is_cancelled());

        let result = fetcher.load_data().await;
        assert!(matches!(result, Err(LoadError::Cancelled)));
    }
}
