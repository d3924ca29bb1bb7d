#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Asynchronous import job orchestrator.
//!
//! Drives the import of a JWST observation from the archive into the
//! catalog: a background task per job starts a transfer on the
//! archive-processing engine, polls it to completion, turns every
//! downloaded file into a catalog record, and links records of the same
//! exposure into processing-lineage chains.
//!
//! Jobs are tracked in an in-memory [`JobRegistry`] shared between the
//! HTTP layer and the background tasks. Jobs can be cancelled at any
//! point and resumed after a lost polling session or a process restart.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod files;
pub mod lineage;
pub mod materialize;
pub mod metadata;
pub mod naming;
pub mod progress;
pub mod registry;
pub mod resume;
pub mod validation;

#[cfg(test)]
mod test_support;

use jwst_archive::ArchiveError;
use jwst_catalog::CatalogError;

pub use clock::{Clock, SystemClock};
pub use config::ImportConfig;
pub use coordinator::{CheckFiles, ImportOrchestrator, StartedImport};
pub use registry::JobRegistry;
pub use validation::ValidationError;

/// Errors that can occur while running or controlling an import.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// Identifier or path failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No job with this id is known locally or to the engine.
    #[error("Import job not found: {job_id}")]
    JobNotFound {
        /// The requested id.
        job_id: String,
    },

    /// The job cannot be resumed.
    #[error("{message}")]
    NotResumable {
        /// Why the job cannot be resumed.
        message: String,
    },

    /// The job already finished successfully.
    #[error("Import job {job_id} is already complete")]
    AlreadyComplete {
        /// The job id.
        job_id: String,
    },

    /// A background task is still driving the job.
    #[error("Import job {job_id} is still running")]
    AlreadyRunning {
        /// The job id.
        job_id: String,
    },

    /// The registry refused to cancel the job.
    #[error("Import job {job_id} could not be cancelled")]
    CancelRefused {
        /// The job id.
        job_id: String,
    },

    /// No downloaded files exist for the observation.
    #[error("No downloaded files found for {obs_id}")]
    NoFiles {
        /// The observation id.
        obs_id: String,
    },

    /// The transfer reported completion without producing any files.
    #[error("Download completed but no files were retrieved")]
    EmptyDownload,

    /// The job was cancelled while the operation was in progress.
    #[error("Import cancelled")]
    Cancelled,

    /// Archive engine call failed.
    #[error("Archive engine error: {0}")]
    Archive(#[from] ArchiveError),

    /// Catalog store call failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
