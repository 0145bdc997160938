//! CLI error handling with user-friendly messages.

use pixstream::cache::CacheError;
use pixstream::loader::LoadError;
use pixstream::net::FetchError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to build the HTTP client
    Client(FetchError),
    /// Failed to set up the cache
    Cache(CacheError),
    /// The image load failed
    Load(LoadError),
    /// Failed to write the output file
    FileWrite { path: String, message: String },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        if let CliError::Load(LoadError::MemoryPressure { .. }) = self {
            eprintln!();
            eprintln!("The image decoded too large for the configured limit.");
            eprintln!("Try --max-dim with a smaller value.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Client(e) => write!(f, "Failed to create HTTP client: {}", e),
            CliError::Cache(e) => write!(f, "Cache setup failed: {}", e),
            CliError::Load(e) => write!(f, "Failed to load image: {}", e),
            CliError::FileWrite { path, message } => {
                write!(f, "Failed to write file '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Client(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::Load(e) => Some(e),
            CliError::FileWrite { .. } => None,
        }
    }
}

impl From<LoadError> for CliError {
    fn from(e: LoadError) -> Self {
        CliError::Load(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}
