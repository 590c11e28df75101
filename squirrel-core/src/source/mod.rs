//! Resource sources: the pluggable backends nuts are fetched from.
//!
//! A [`ResourceSource`] turns logical paths into versioned bytes. Concrete
//! network backends (FTP, cloud storage, HTTP proxies) live outside this
//! crate and only need to implement the trait; the in-tree implementations
//! are [`MemorySource`] for tests and wiring experiments and
//! [`FilesystemSource`] for disk-backed assets.

pub mod filesystem;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::core::{Result, SquirrelError};
use crate::nut::Nut;

pub use filesystem::FilesystemSource;
pub use memory::MemorySource;

/// How a source derives the version token of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionStrategy {
    /// Version is the last-changed timestamp.
    #[default]
    Timestamp,
    /// Version is a SHA-256 digest of the content.
    ContentHash,
}

/// A versioned, byte-addressable backend for logical asset paths.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Identifier used in logs and error messages.
    fn id(&self) -> String;

    /// Lists the paths matching the given regular expression.
    async fn list(&self, pattern: &str) -> Result<Vec<String>>;

    /// Opens a path and returns its bytes.
    async fn open(&self, path: &str) -> Result<Vec<u8>>;

    /// Timestamp (milliseconds) of the last change of the given path.
    async fn last_changed(&self, path: &str) -> Result<i64>;

    /// Opaque comparable version token for the given path.
    async fn version_number(&self, path: &str) -> Result<String>;

    /// Whether [`ResourceSource::save`] is available on this source.
    fn supports_save(&self) -> bool {
        false
    }

    /// Persists a processed nut back into the source.
    async fn save(&self, nut: &Nut) -> Result<()> {
        let _ = nut;
        Err(SquirrelError::SaveNotSupported { id: self.id() })
    }

    /// Returns a new source resolving every path under the given root.
    fn with_root_path(&self, root: &str) -> Arc<dyn ResourceSource>;
}

/// Hex-encoded SHA-256 digest of the given bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Joins a root prefix and a relative path without doubling separators.
pub(crate) fn join_paths(root: &str, path: &str) -> String {
    if root.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash(b"nuts"), content_hash(b"nuts"));
        assert_ne!(content_hash(b"nuts"), content_hash(b"bolts"));
        assert_eq!(content_hash(b"").len(), 64);
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("", "a.js"), "a.js");
        assert_eq!(join_paths("css/", "/a.css"), "css/a.css");
        assert_eq!(join_paths("deep/dir", "x.png"), "deep/dir/x.png");
    }
}
