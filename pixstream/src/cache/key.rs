//! Stable cache keys derived from request identities.

use sha2::{Digest, Sha256};

/// Cache key uniquely identifying a cached image.
///
/// The key is the lowercase-hex SHA-256 digest of the request identity
/// (URL or file path). Identical identities always hash to identical keys
/// across repeated calls and across process runs, and the hex string is
/// safe to use directly as a disk file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request identity.
    pub fn for_identity(identity: &str) -> Self {
        let digest = Sha256::digest(identity.as_bytes());
        Self(hex::encode(digest))
    }

    /// The hex digest, used as the disk cache file name.
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// File name for an ephemeral download destination.
    ///
    /// The worker id keeps concurrent fetchers for different requests from
    /// colliding in the shared cache directory.
    pub fn temp_file_name(&self, worker_id: u64) -> String {
        format!("{}_temp_{}", self.0, worker_id)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
