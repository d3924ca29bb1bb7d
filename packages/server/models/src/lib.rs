#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the JWST import server.
//!
//! These types are serialized to JSON for the REST API. They are separate
//! from the engine's wire types to allow independent evolution of the API
//! contract. Job snapshots are served as `jwst_import_models::ImportJobStatus`
//! directly.

use jwst_archive_models::ResumableDownload;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable description.
    pub error: String,
}

/// Response to an accepted import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportResponse {
    pub job_id: String,
    pub obs_id: String,
}

/// Acknowledgement of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: String,
    pub message: String,
}

/// Acknowledgement of a resume request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    /// Job to poll. Differs from the requested id when a transfer known
    /// only to the engine was recovered.
    pub job_id: String,
    pub obs_id: String,
    /// `transfer`, `save_existing`, or `recovered`.
    pub mode: String,
    pub message: String,
}

/// Whether downloaded files already exist for an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFilesResponse {
    pub exists: bool,
    pub file_count: usize,
}

/// A transfer the engine can resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResumableTransfer {
    /// Engine-side transfer id. Accepted by the resume endpoint.
    pub job_id: String,
    pub obs_id: String,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub progress_percent: f64,
    pub status: String,
    pub started_at: Option<String>,
}

impl From<ResumableDownload> for ApiResumableTransfer {
    fn from(d: ResumableDownload) -> Self {
        Self {
            job_id: d.job_id,
            obs_id: d.obs_id,
            downloaded_bytes: d.downloaded_bytes,
            total_bytes: d.total_bytes,
            progress_percent: d.progress_percent,
            status: d.status,
            started_at: d.started_at,
        }
    }
}

/// Response of the resumable-transfer listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumableResponse {
    pub jobs: Vec<ApiResumableTransfer>,
}
