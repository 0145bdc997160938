//! Image loading pipeline.
//!
//! # Architecture
//!
//! ```text
//! Request → Resolve → Memory tier → Disk tier → Fetch → Decode → Deliver
//! ```
//!
//! Fetch and decode always run on background contexts; result delivery
//! for callback-driven loads happens on the foreground executor. Decode
//! failures are split into corruption (evicts the disk entry so a future
//! request re-fetches) and memory pressure (retains the entry; the
//! environment, not the content, was at fault).

mod decode;
mod fetcher;
mod pipeline;

pub use decode::{compute_sample_size, is_gif, DecodeError, Decoder, ImageCrateDecoder};
pub use fetcher::{BitmapFetcher, LoadHandle};
pub use pipeline::{ImageLoader, LoadError, LoadSource, LoadedImage, LoaderConfig};
