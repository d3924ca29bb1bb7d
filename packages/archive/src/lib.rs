#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the archive-processing engine.
//!
//! The engine owns the chunked retrieval of observation files and
//! persists its own transfer state independently of the importer. The
//! importer drives it through the [`ArchiveEngine`] trait; the
//! production implementation is [`http::HttpArchiveEngine`].

pub mod http;
pub mod retry;

use async_trait::async_trait;
use jwst_archive_models::{DownloadProgress, DownloadRequest, DownloadStarted, ResumableDownload};

pub use http::HttpArchiveEngine;

/// Errors that can occur while talking to the engine.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// HTTP request failed (connection, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine does not know the requested transfer.
    #[error("Not found: {resource}")]
    NotFound {
        /// What was looked up.
        resource: String,
    },

    /// The engine answered with a non-success status.
    #[error("Engine returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The engine URL could not be built.
    #[error("Invalid engine URL: {message}")]
    InvalidUrl {
        /// Description of what went wrong.
        message: String,
    },
}

impl ArchiveError {
    /// Whether this error means the engine has no record of the resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Operations the importer needs from the archive-processing engine.
#[async_trait]
pub trait ArchiveEngine: Send + Sync {
    /// Starts a new chunked download.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the engine refuses or cannot be reached.
    async fn start_download(
        &self,
        request: &DownloadRequest,
    ) -> Result<DownloadStarted, ArchiveError>;

    /// Fetches the current state of a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::NotFound`] if the engine does not know the
    /// transfer, or another [`ArchiveError`] if it cannot be reached.
    async fn progress(&self, download_job_id: &str) -> Result<DownloadProgress, ArchiveError>;

    /// Pauses a running transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the pause was not acknowledged.
    async fn pause(&self, download_job_id: &str) -> Result<(), ArchiveError>;

    /// Resumes a paused or interrupted transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::NotFound`] if the engine no longer knows the
    /// transfer.
    async fn resume(&self, download_job_id: &str) -> Result<DownloadStarted, ArchiveError>;

    /// Lists transfers the engine has persisted and can resume.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the engine cannot be reached.
    async fn list_resumable(&self) -> Result<Vec<ResumableDownload>, ArchiveError>;

    /// Fetches the archive's metadata record for an observation.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the search fails.
    async fn observation_metadata(
        &self,
        obs_id: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ArchiveError>;
}
