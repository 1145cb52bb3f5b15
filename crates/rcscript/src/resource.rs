//! Bundled script resources.
//!
//! Resources are addressed by absolute-style paths (`/scripts/main.rhai`);
//! a missing leading `/` is added. Lookups check in-memory entries first,
//! then the optional root directory.

use crate::data::SourceStream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ResourceBundle {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
    root: Option<PathBuf>,
}

impl ResourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bundle that falls back to files below `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Adds or replaces an in-memory resource.
    pub fn add(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let contents: Vec<u8> = contents.into();
        self.entries
            .write()
            .insert(normalize(path), Arc::from(contents));
    }

    pub fn remove(&self, path: &str) -> bool {
        self.entries.write().remove(&normalize(path)).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        let path = normalize(path);
        if self.entries.read().contains_key(&path) {
            return true;
        }
        self.file_path(&path).is_some_and(|file| file.is_file())
    }

    /// Opens a resource as a source stream.
    pub fn open(&self, path: &str) -> io::Result<SourceStream> {
        let path = normalize(path);
        if let Some(contents) = self.entries.read().get(&path) {
            return Ok(Box::new(Cursor::new(contents.clone())));
        }
        match self.file_path(&path) {
            Some(file) => Ok(Box::new(std::fs::File::open(file)?)),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("resource not found: {}", path),
            )),
        }
    }

    fn file_path(&self, normalized: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(normalized.trim_start_matches('/')))
    }
}

/// Resource path with exactly one leading `/`.
pub fn normalize(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}
