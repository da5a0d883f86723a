//! Chapter Asset Storage
//!
//! Maps a chapter's `storage_locator` to the bytes of its fragment document.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),

    #[error("I/O error reading {locator}: {source}")]
    Io {
        locator: String,
        #[source]
        source: io::Error,
    },
}

/// Source of chapter fragment bytes.
pub trait AssetSource {
    fn open(&self, locator: &str) -> Result<Vec<u8>, AssetError>;
}

impl<T: AssetSource + ?Sized> AssetSource for &T {
    fn open(&self, locator: &str) -> Result<Vec<u8>, AssetError> {
        (**self).open(locator)
    }
}

/// Reads locators as paths relative to a root directory.
#[derive(Debug, Clone)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, AssetError> {
        let relative = Path::new(locator);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if locator.is_empty() || escapes {
            return Err(AssetError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetSource for FsAssetSource {
    fn open(&self, locator: &str) -> Result<Vec<u8>, AssetError> {
        let path = self.resolve(locator)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AssetError::NotFound(locator.to_string()),
            _ => AssetError::Io { locator: locator.to_string(), source: e },
        })
    }
}

/// In-memory assets, keyed by locator.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: &str, bytes: Vec<u8>) {
        self.files.insert(locator.to_string(), bytes);
    }

    pub fn remove(&mut self, locator: &str) -> Option<Vec<u8>> {
        self.files.remove(locator)
    }
}

impl AssetSource for MemoryAssets {
    fn open(&self, locator: &str) -> Result<Vec<u8>, AssetError> {
        self.files
            .get(locator)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(locator.to_string()))
    }
}
