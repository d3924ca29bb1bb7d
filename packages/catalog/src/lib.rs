#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storage seams consumed by the import pipeline.
//!
//! The catalog document store, the file storage holding downloaded
//! files, and the thumbnail generation queue are all external to the
//! importer. Each is expressed as a trait here with a local
//! implementation suitable for a single-node deployment:
//!
//! - [`CatalogStore`]: create, read, and update [`CatalogRecord`]s
//!   ([`MemoryCatalogStore`], [`FileCatalogStore`]).
//! - [`FileStorage`]: stat files by storage key ([`LocalStorage`]).
//! - [`ThumbnailQueue`]: fire-and-forget thumbnail requests
//!   ([`LogThumbnailQueue`]).

pub mod file_store;
pub mod memory;
pub mod storage;
pub mod thumbnails;

use async_trait::async_trait;
use jwst_catalog_models::{CatalogRecord, NewCatalogRecord};

pub use file_store::FileCatalogStore;
pub use memory::MemoryCatalogStore;
pub use storage::{FileStorage, LocalStorage};
pub use thumbnails::{LogThumbnailQueue, ThumbnailQueue};

/// Errors that can occur during catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// I/O error (snapshot or file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record to update does not exist.
    #[error("Record not found: {id}")]
    NotFound {
        /// Id that was looked up.
        id: String,
    },
}

/// Document store holding catalog records.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the store cannot be read.
    async fn get(&self, id: &str) -> Result<Option<CatalogRecord>, CatalogError>;

    /// Fetches every record whose id is in `ids`. Missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the store cannot be read.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<CatalogRecord>, CatalogError>;

    /// Looks up the record with the given file name, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the store cannot be read.
    async fn find_by_file_name(&self, file_name: &str)
    -> Result<Option<CatalogRecord>, CatalogError>;

    /// Persists a new record and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the record cannot be written.
    async fn create(&self, record: NewCatalogRecord) -> Result<CatalogRecord, CatalogError>;

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NotFound`] if no record has `record.id`.
    async fn update(&self, record: CatalogRecord) -> Result<(), CatalogError>;
}
