//! Filesystem-backed cache for model responses.
//!
//! Keys are deterministic strings derived from the operation and its inputs;
//! the filename is the hex MD5 of the key under the cache root. Concurrent
//! writers to the same key race benignly: the key fixes the prompt, so every
//! writer produces semantically equivalent bytes and last-writer-wins is
//! fine. Writes are best-effort; a failed write never fails the caller.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

/// Cache rooted at a directory, one `<hex-md5>.json` file per key.
#[derive(Clone, Debug)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache file path for `key`. Distinct keys map to distinct files up to
    /// MD5 collisions, which this cache does not attempt to detect.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        self.root.join(format!("{digest:x}.json"))
    }

    /// Read the cached bytes for `key`, or `None` on miss or any I/O error.
    pub async fn read(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                debug!(key, path = %path.display(), "cache hit");
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "cache read failed");
                None
            }
        }
    }

    /// Write `bytes` for `key`. Best-effort: failures are logged and
    /// swallowed.
    pub async fn write(&self, key: &str, bytes: &[u8]) {
        let path = self.path_for(key);
        if let Err(e) = fs::create_dir_all(&self.root).await {
            warn!(path = %self.root.display(), error = %e, "cache directory creation failed");
            return;
        }
        if let Err(e) = fs::write(&path, bytes).await {
            warn!(key, path = %path.display(), error = %e, "cache write failed");
        }
    }
}
