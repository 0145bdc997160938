//! `pixstream cache` - inspect and clear the disk cache tier.

use crate::error::CliError;
use clap::{Args, Subcommand};
use pixstream::cache::{CacheConfig, ImageCache};
use std::path::PathBuf;

/// Arguments for the cache command.
#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Cache directory (defaults to the platform cache dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache maintenance actions.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show disk cache usage
    Stats,
    /// Remove every disk cache entry
    Clear,
}

/// Run the cache command.
pub fn run(args: CacheArgs) -> Result<(), CliError> {
    let mut config = CacheConfig::new();
    if let Some(dir) = args.cache_dir {
        config = config.with_cache_dir(dir);
    }
    let cache = ImageCache::new(config)?;

    match args.action {
        CacheAction::Stats => {
            let (count, bytes) = cache.disk_usage()?;
            println!("Cache directory: {}", cache.disk_cache_dir().display());
            println!("Entries:         {}", count);
            println!("Size:            {:.2} MB", bytes as f64 / (1024.0 * 1024.0));
        }
        CacheAction::Clear => {
            let (count, _) = cache.disk_usage()?;
            cache.clear_disk()?;
            println!("Removed {} cache entries", count);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_clear_empties_directory() {
        let temp = TempDir::new().unwrap();
        let config = CacheConfig::new().with_cache_dir(temp.path().to_path_buf());
        let cache = ImageCache::new(config).unwrap();

        let key = pixstream::cache::CacheKey::for_identity("https://example.com/a.png");
        cache.add_stream_to_disk(&key, &mut Cursor::new(vec![1, 2, 3]));

        run(CacheArgs {
            cache_dir: Some(temp.path().to_path_buf()),
            action: CacheAction::Clear,
        })
        .unwrap();

        assert!(!cache.contains_in_disk(&key));
    }
}
