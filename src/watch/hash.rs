// src/watch/hash.rs

use std::path::Path;

use anyhow::Result;
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;

/// Hash of a model file's content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Remembers the last seen content hash of one file.
///
/// Editors often write a file several times per save, or touch it without
/// changing it; only a different hash counts as a change.
#[derive(Debug, Default)]
pub struct ContentTracker {
    last: Option<String>,
}

impl ContentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the file's current content. Returns `true` if it differs from
    /// what was recorded before.
    pub fn observe(&mut self, path: &Path, fs: &dyn FileSystem) -> Result<bool> {
        let hash = content_hash(&fs.read_to_string(path)?);
        Ok(self.record(hash))
    }

    fn record(&mut self, hash: String) -> bool {
        if self.last.as_deref() == Some(hash.as_str()) {
            debug!(hash = %hash, "content unchanged");
            return false;
        }
        debug!(hash = %hash, "content changed");
        self.last = Some(hash);
        true
    }
}
