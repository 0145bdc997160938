//! HTTP transport for image fetching.
//!
//! One pooled [`reqwest::Client`] is built at construction and injected
//! wherever bytes are fetched; nothing constructs a client per call. The
//! [`HttpClient`] trait exists for dependency injection so tests can run
//! against a mock instead of a socket.

use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Default User-Agent for outgoing requests.
const DEFAULT_USER_AGENT: &str = concat!("pixstream/", env!("CARGO_PKG_VERSION"));

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS, connect or timeout failure; the request never completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-200 status.
    #[error("HTTP {code} from {url}")]
    Status {
        /// Response status code
        code: u16,
        /// Requested URL
        url: String,
    },

    /// I/O failure while consuming the body or writing the destination.
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client itself could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Idle pooled connections kept per host (default: 32)
    pub pool_max_idle_per_host: usize,
    /// User-Agent header value
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            pool_max_idle_per_host: 32,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Classify a request identity: network URL or local path.
pub fn is_url(identity: &str) -> bool {
    let lower = identity.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Abstraction over raw byte transport.
///
/// `download_to_stream` performs an HTTP GET, validates a 200 status, and
/// copies the (transparently decompressed) body into `dest` exactly once.
/// Connection resources are released on every exit path; dropping the
/// body stream aborts an in-flight transfer.
pub trait HttpClient: Send + Sync {
    /// Stream the response body for `url` into `dest`.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    /// * `headers` - Extra request headers as (name, value) pairs
    /// * `dest` - Destination the body is copied into
    ///
    /// # Returns
    ///
    /// The number of body bytes written, or a [`FetchError`].
    fn download_to_stream<'a, W>(
        &'a self,
        url: &'a str,
        headers: &'a [(String, String)],
        dest: &'a mut W,
    ) -> impl Future<Output = Result<u64, FetchError>> + Send + 'a
    where
        W: AsyncWrite + Send + Unpin;
}

/// Real HTTP client backed by a pooled `reqwest::Client`.
///
/// Compressed transfer encodings are decompressed transparently by the
/// underlying client before the bytes reach the destination.
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Build a client from configuration.
    pub fn new(config: HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    async fn download_to_stream<'a, W>(
        &'a self,
        url: &'a str,
        headers: &'a [(String, String)],
        dest: &'a mut W,
    ) -> Result<u64, FetchError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        trace!(url, "HTTP GET starting");

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "HTTP request failed");
                return Err(FetchError::Transport(err.to_string()));
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(url, status = status.as_u16(), "unexpected HTTP status");
            return Err(FetchError::Status {
                code: status.as_u16(),
                url: url.to_string(),
            });
        }

        // Dropping the response on any failure below aborts the
        // in-flight transfer and releases the pooled connection.
        let mut copied = 0u64;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    warn!(url, error = %err, "body read failed mid-stream");
                    return Err(FetchError::Transport(err.to_string()));
                }
            };
            dest.write_all(&chunk).await?;
            copied += chunk.len() as u64;
        }
        dest.flush().await?;

        debug!(url, bytes = copied, "HTTP body streamed");
        Ok(copied)
    }
}
