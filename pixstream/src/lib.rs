//! Pixstream - asynchronous image fetch-and-cache pipeline
//!
//! This library provides the core machinery for loading images from the
//! network or the local filesystem, decoding them with memory-aware
//! downsampling, and keeping the results in a two-tier (memory + disk)
//! cache.
//!
//! # High-Level API
//!
//! For most use cases, the [`loader`] module provides the entry point:
//!
//! ```ignore
//! use pixstream::loader::{ImageLoader, LoaderConfig};
//! use pixstream::cache::{CacheConfig, ImageCache};
//! use pixstream::net::ReqwestClient;
//! use pixstream::request::ImageRequest;
//!
//! let cache = ImageCache::new(CacheConfig::default())?;
//! let loader = ImageLoader::new(ReqwestClient::new(Default::default())?, cache, foreground);
//!
//! let request = ImageRequest::new("https://example.com/photo.jpg");
//! let image = loader.load(&request).await?;
//! ```

pub mod bitmap;
pub mod cache;
pub mod loader;
pub mod logging;
pub mod net;
pub mod request;
pub mod task;

/// Version of the pixstream library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
