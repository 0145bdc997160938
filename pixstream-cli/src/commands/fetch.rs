//! `pixstream fetch` - load one image through the full pipeline.

use crate::error::CliError;
use clap::Args;
use pixstream::cache::{CacheConfig, ImageCache};
use pixstream::loader::ImageLoader;
use pixstream::net::{HttpConfig, ReqwestClient};
use pixstream::request::ImageRequest;
use pixstream::task::ForegroundExecutor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Image URL or local file path
    pub identity: String,

    /// Write the decoded image to this path (PNG)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Bound both decoded dimensions; the pipeline downsamples to fit
    #[arg(long)]
    pub max_dim: Option<u32>,

    /// Probe for animated-image content
    #[arg(long)]
    pub animated: bool,

    /// Extra request header, as name=value (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Cache directory (defaults to the platform cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// Parse a name=value header argument.
fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

/// Run the fetch command.
pub async fn run(args: FetchArgs) -> Result<(), CliError> {
    let mut cache_config = CacheConfig::new();
    if let Some(dir) = args.cache_dir {
        cache_config = cache_config.with_cache_dir(dir);
    }
    let cache = Arc::new(ImageCache::new(cache_config)?);

    let http = ReqwestClient::new(HttpConfig::default()).map_err(CliError::Client)?;
    let loader = ImageLoader::new(http, cache, ForegroundExecutor::start());

    let mut request = ImageRequest::new(&args.identity);
    if let Some(dim) = args.max_dim {
        request = request.with_max_dimensions(dim, dim);
    }
    if args.animated {
        request = request.with_animated_support();
    }
    for (name, value) in args.headers {
        request = request.with_header(name, value);
    }

    let image = loader.load(&request).await?;
    info!(
        source = ?image.source,
        width = image.bitmap.width(),
        height = image.bitmap.height(),
        animated = image.is_animated,
        "image loaded"
    );

    println!(
        "Loaded {} ({}x{}, {} KB, source: {:?}{})",
        args.identity,
        image.bitmap.width(),
        image.bitmap.height(),
        image.bitmap.byte_size() / 1024,
        image.source,
        if image.is_animated { ", animated" } else { "" },
    );

    if let Some(output) = args.output {
        image::save_buffer(
            &output,
            image.bitmap.pixels(),
            image.bitmap.width(),
            image.bitmap.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| CliError::FileWrite {
            path: output.display().to_string(),
            message: e.to_string(),
        })?;
        println!("Wrote {}", output.display());
    }

    Ok(())
}
