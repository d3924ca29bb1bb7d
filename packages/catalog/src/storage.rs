//! File storage holding downloaded archive files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::CatalogError;

/// Read access to downloaded files, addressed by storage key.
///
/// A storage key is the file path relative to the storage root, using
/// `/` separators.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Returns the size in bytes of the file stored under `storage_key`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the file cannot be stat'ed.
    async fn file_size(&self, storage_key: &str) -> Result<u64, CatalogError>;
}

/// [`FileStorage`] over a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Creates storage rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn file_size(&self, storage_key: &str) -> Result<u64, CatalogError> {
        let path = self.root.join(storage_key);
        Ok(tokio::fs::metadata(&path).await?.len())
    }
}
