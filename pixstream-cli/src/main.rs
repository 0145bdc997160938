//! Pixstream CLI - command-line interface
//!
//! This binary provides a command-line interface to the pixstream
//! library: fetch single images through the pipeline and manage the
//! disk cache.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::{cache, fetch};
use pixstream::logging::init_logging;

#[derive(Parser)]
#[command(name = "pixstream")]
#[command(version = pixstream::VERSION)]
#[command(about = "Fetch, decode and cache images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load one image through the fetch-decode-cache pipeline
    Fetch(fetch::FetchArgs),
    /// Inspect or clear the disk cache
    Cache(cache::CacheArgs),
}

#[tokio::main]
async fn main() {
    let _logging = init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Fetch(args) => fetch::run(args).await,
        Command::Cache(args) => cache::run(args),
    };

    if let Err(err) = result {
        err.exit();
    }
}
