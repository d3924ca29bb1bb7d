#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Request and response types exchanged with the archive-processing
//! engine.
//!
//! The engine is a separate service that performs the actual chunked
//! retrieval of observation files from the MAST archive. Field names
//! follow the engine's `snake_case` JSON.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Where the engine retrieves files from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DownloadSource {
    /// The public S3 mirror of the archive.
    S3,
    /// Direct HTTP download from the archive portal.
    Http,
}

/// Request to start a chunked download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Archive observation identifier.
    pub obs_id: String,
    /// Restrict to these product types (e.g. `SCIENCE`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_types: Option<Vec<String>>,
    /// Restrict to these calibration levels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calib_levels: Option<Vec<u8>>,
    /// Source to retrieve from.
    pub source: DownloadSource,
}

/// Acknowledgement of a started or resumed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStarted {
    /// Engine-side transfer id.
    pub job_id: String,
    /// Observation being transferred.
    #[serde(default)]
    pub obs_id: Option<String>,
    /// Human-readable status.
    #[serde(default)]
    pub message: Option<String>,
}

/// Lifecycle stage reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngineStage {
    /// Queued, not yet transferring.
    #[default]
    Pending,
    /// Resolving the file list.
    Preparing,
    /// Transferring bytes.
    Downloading,
    /// Paused on request.
    Paused,
    /// Finished successfully.
    Complete,
    /// Finished unsuccessfully.
    Failed,
    /// Any stage this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Per-file transfer state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProgress {
    pub filename: String,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub progress_percent: f64,
    pub status: String,
}

/// Snapshot of a transfer as reported by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadProgress {
    /// Engine-side transfer id.
    pub job_id: String,
    /// Observation being transferred.
    pub obs_id: String,
    /// Current stage.
    pub stage: EngineStage,
    /// Overall progress, 0-100.
    pub progress: f64,
    /// Human-readable status.
    pub message: String,
    /// Whether the engine considers the transfer finished.
    pub is_complete: bool,
    /// Error description when the transfer failed.
    pub error: Option<String>,
    /// Bytes transferred so far.
    pub downloaded_bytes: u64,
    /// Total bytes expected, `0` when unknown.
    pub total_bytes: u64,
    /// Current transfer rate.
    pub speed_bytes_per_sec: f64,
    /// Estimated seconds remaining.
    pub eta_seconds: Option<f64>,
    /// Paths of files written so far.
    pub files: Vec<String>,
    /// Per-file detail.
    pub file_progress: Vec<FileProgress>,
    /// Directory the engine writes into.
    pub download_dir: Option<String>,
    /// Whether a failed or interrupted transfer can be resumed.
    pub is_resumable: bool,
}

impl DownloadProgress {
    /// Whether the engine reports the transfer as failed.
    ///
    /// An empty `error` string is treated as no error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.stage, EngineStage::Failed)
            || self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// A transfer the engine has persisted and can resume.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumableDownload {
    /// Engine-side transfer id.
    pub job_id: String,
    /// Observation being transferred.
    pub obs_id: String,
    /// Bytes transferred before the interruption.
    pub downloaded_bytes: u64,
    /// Total bytes expected.
    pub total_bytes: u64,
    /// Progress, 0-100.
    pub progress_percent: f64,
    /// Engine status string.
    pub status: String,
    /// When the transfer started, as reported by the engine.
    pub started_at: Option<String>,
}

/// Envelope returned by the engine's resumable-list endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumableList {
    pub jobs: Vec<ResumableDownload>,
}
