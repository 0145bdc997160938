//! Load requests and the fetch contract.

use crate::cache::CacheKey;
use crate::net::is_url;
use std::future::Future;

/// Caller-supplied description of one image load.
///
/// The identity is a network URL or a local file path; it is also the
/// sole input to the cache key, so identical identities share cache
/// entries. The pipeline only reads the request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    identity: String,
    headers: Vec<(String, String)>,
    animated_ok: bool,
    max_dimensions: Option<(u32, u32)>,
}

impl ImageRequest {
    /// Create a request for a URL or local path.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            headers: Vec::new(),
            animated_ok: false,
            max_dimensions: None,
        }
    }

    /// Add a request header (network fetches only).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Ask the pipeline to probe for animated-image content.
    pub fn with_animated_support(mut self) -> Self {
        self.animated_ok = true;
        self
    }

    /// Bound the decoded size; the decoder downsamples to fit.
    pub fn with_max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_dimensions = Some((width, height));
        self
    }

    /// The request identity (URL or path).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Extra request headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Whether animated-format detection was requested.
    pub fn animated_ok(&self) -> bool {
        self.animated_ok
    }

    /// The sampling hint, if any.
    pub fn max_dimensions(&self) -> Option<(u32, u32)> {
        self.max_dimensions
    }

    /// True when the identity is a network URL.
    pub fn is_network(&self) -> bool {
        is_url(&self.identity)
    }

    /// Cache key for this request.
    pub fn key(&self) -> CacheKey {
        CacheKey::for_identity(&self.identity)
    }
}

/// Result delivery for an asynchronous fetch.
///
/// Exactly one of the two methods is invoked per load.
pub trait DataCallback<T, E>: Send {
    /// The fetch produced data.
    fn on_data_ready(&self, data: T);

    /// The fetch failed.
    fn on_load_failed(&self, error: E);
}

/// An asynchronous "fetch then clean up" contract.
///
/// `load_data` performs the fetch; `cleanup` releases any resources the
/// fetch acquired and is safe to call whether or not `load_data` ran to
/// completion.
pub trait DataFetcher: Send {
    /// Data produced on success.
    type Data: Send;
    /// Error produced on failure.
    type Error: Send;

    /// Run the fetch.
    fn load_data(&mut self) -> impl Future<Output = Result<Self::Data, Self::Error>> + Send;

    /// Release resources associated with the fetch.
    fn cleanup(&mut self);
}
