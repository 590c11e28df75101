//! In-memory resource source.
//!
//! Primarily a test double, but also the simplest way to feed literal assets
//! into a pipeline. Tracks per-path read counts so tests can assert how many
//! times the pipeline actually went back to the source.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use super::{content_hash, join_paths, ResourceSource, VersionStrategy};
use crate::core::{Result, SquirrelError};
use crate::nut::Nut;

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    last_changed: i64,
}

#[derive(Debug)]
struct Inner {
    name: String,
    entries: Mutex<HashMap<String, Entry>>,
    reads: Mutex<HashMap<String, usize>>,
    saved: Mutex<Vec<String>>,
    strategy: VersionStrategy,
    save_supported: bool,
}

/// A map-backed [`ResourceSource`].
#[derive(Debug, Clone)]
pub struct MemorySource {
    inner: Arc<Inner>,
    root: String,
}

impl MemorySource {
    /// Creates an empty source with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                entries: Mutex::new(HashMap::new()),
                reads: Mutex::new(HashMap::new()),
                saved: Mutex::new(Vec::new()),
                strategy: VersionStrategy::Timestamp,
                save_supported: false,
            }),
            root: String::new(),
        }
    }

    /// Switches version tokens to content hashes.
    pub fn with_content_versions(mut self) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("configure the source before sharing it");
        inner.strategy = VersionStrategy::ContentHash;
        self
    }

    /// Enables the save capability, making this source usable as a sink.
    pub fn with_save_support(mut self) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("configure the source before sharing it");
        inner.save_supported = true;
        self
    }

    /// Inserts or replaces a path with the given content and timestamp.
    pub fn put(&self, path: &str, bytes: impl Into<Vec<u8>>, last_changed: i64) {
        self.inner.entries.lock().insert(
            path.to_string(),
            Entry {
                bytes: bytes.into(),
                last_changed,
            },
        );
    }

    /// Updates the last-changed timestamp of a path without touching bytes.
    pub fn touch(&self, path: &str, last_changed: i64) {
        if let Some(entry) = self.inner.entries.lock().get_mut(path) {
            entry.last_changed = last_changed;
        }
    }

    /// Number of times `open` was called for the given path.
    pub fn read_count(&self, path: &str) -> usize {
        self.inner.reads.lock().get(path).copied().unwrap_or(0)
    }

    /// Names of the nuts saved into this source, in save order.
    pub fn saved(&self) -> Vec<String> {
        self.inner.saved.lock().clone()
    }

    fn resolve(&self, path: &str) -> String {
        join_paths(&self.root, path)
    }

    fn entry(&self, path: &str) -> Result<Entry> {
        let full = self.resolve(path);
        self.inner
            .entries
            .lock()
            .get(&full)
            .cloned()
            .ok_or_else(|| SquirrelError::Stream {
                path: full,
                message: format!("no such entry in source '{}'", self.inner.name),
            })
    }
}

#[async_trait]
impl ResourceSource for MemorySource {
    fn id(&self) -> String {
        if self.root.is_empty() {
            self.inner.name.clone()
        } else {
            format!("{}:{}", self.inner.name, self.root)
        }
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>> {
        let regex = Regex::new(pattern)?;
        let mut paths: Vec<String> = self
            .inner
            .entries
            .lock()
            .keys()
            .filter(|p| regex.is_match(p))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn open(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.entry(path)?;
        *self
            .inner
            .reads
            .lock()
            .entry(self.resolve(path))
            .or_insert(0) += 1;
        Ok(entry.bytes)
    }

    async fn last_changed(&self, path: &str) -> Result<i64> {
        Ok(self.entry(path)?.last_changed)
    }

    async fn version_number(&self, path: &str) -> Result<String> {
        let entry = self.entry(path)?;
        Ok(match self.inner.strategy {
            VersionStrategy::Timestamp => entry.last_changed.to_string(),
            VersionStrategy::ContentHash => content_hash(&entry.bytes),
        })
    }

    fn supports_save(&self) -> bool {
        self.inner.save_supported
    }

    async fn save(&self, nut: &Nut) -> Result<()> {
        if !self.inner.save_supported {
            return Err(SquirrelError::SaveNotSupported { id: self.id() });
        }
        let bytes = nut.open().await?;
        let full = self.resolve(nut.name());
        self.inner.entries.lock().insert(
            full.clone(),
            Entry {
                bytes: bytes.to_vec(),
                last_changed: 0,
            },
        );
        self.inner.saved.lock().push(full);
        Ok(())
    }

    fn with_root_path(&self, root: &str) -> Arc<dyn ResourceSource> {
        Arc::new(Self {
            inner: self.inner.clone(),
            root: join_paths(&self.root, root),
        })
    }
}
