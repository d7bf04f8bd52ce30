// src/fs/mock.rs

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use super::FileSystem;

#[derive(Debug, Clone)]
enum MockEntry {
    File { content: Vec<u8>, executable: bool },
    Dir(BTreeSet<String>),
}

/// In-memory filesystem for tests.
///
/// Parent directories are created implicitly when a file is added.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain (non-executable) file.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.insert_file(path.as_ref(), content.into(), false);
    }

    /// Add an executable file with empty content.
    pub fn add_executable(&self, path: impl AsRef<Path>) {
        self.insert_file(path.as_ref(), Vec::new(), true);
    }

    fn insert_file(&self, path: &Path, content: Vec<u8>, executable: bool) {
        let mut entries = self.lock();
        entries.insert(
            path.to_path_buf(),
            MockEntry::File {
                content,
                executable,
            },
        );
        Self::link_into_parent(&mut entries, path);
    }

    fn link_into_parent(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        if parent.as_os_str().is_empty() {
            return;
        }

        let is_new = !entries.contains_key(parent);
        let dir = entries
            .entry(parent.to_path_buf())
            .or_insert_with(|| MockEntry::Dir(BTreeSet::new()));
        if let MockEntry::Dir(children) = dir {
            children.insert(name.to_string_lossy().into_owned());
        }
        if is_new {
            Self::link_into_parent(entries, parent);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, MockEntry>> {
        // A poisoned mock only happens after a test already panicked.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        match self.lock().get(path) {
            Some(MockEntry::File { content, .. }) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(MockEntry::Dir(_)))
    }

    fn is_executable(&self, path: &Path) -> bool {
        matches!(
            self.lock().get(path),
            Some(MockEntry::File {
                executable: true,
                ..
            })
        )
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        match self.lock().get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
