#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Import job configuration, progress, and result types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use jwst_archive_models::FileProgress;
use jwst_catalog_models::ProcessingLevel;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Phase of an import job.
///
/// Jobs move forward through `Starting → Downloading → SavingRecords →
/// Complete`. `Failed` is reachable from every non-terminal stage.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImportStage {
    /// Choosing a source and starting the remote transfer.
    Starting,
    /// Polling the remote transfer.
    Downloading,
    /// Creating catalog records and linking lineage.
    SavingRecords,
    /// Finished successfully.
    Complete,
    /// Finished unsuccessfully (including cancellation).
    Failed,
}

impl ImportStage {
    /// Whether no further transitions are possible from this stage.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Which transfer source(s) an import may use.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SourcePreference {
    /// Primary source, falling back to the secondary if configured.
    #[default]
    Auto,
    /// S3 only.
    S3,
    /// Direct HTTP only.
    Http,
}

/// Parameters of a new import.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    /// Archive observation identifier.
    pub obs_id: String,
    /// Restrict to these product types.
    #[serde(default)]
    pub product_types: Option<Vec<String>>,
    /// Restrict to these calibration levels.
    #[serde(default)]
    pub calib_levels: Option<Vec<u8>>,
    /// Owner recorded on created records.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Transfer source policy.
    #[serde(default)]
    pub source: SourcePreference,
}

impl ImportRequest {
    /// Creates a request for `obs_id` with default options.
    #[must_use]
    pub fn new(obs_id: impl Into<String>) -> Self {
        Self {
            obs_id: obs_id.into(),
            ..Self::default()
        }
    }
}

/// Byte-level transfer detail. Advisory only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub files: Vec<FileProgress>,
}

/// Outcome of a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Every record id produced or reused by the import, in file order.
    pub record_ids: Vec<String>,
    /// Record ids grouped by processing level.
    pub lineage_tree: BTreeMap<ProcessingLevel, Vec<String>>,
    /// Observation the files belong to, if any filename revealed one.
    pub observation_base_id: Option<String>,
    /// Number of records newly created.
    pub records_created: usize,
    /// Number of existing records reused.
    pub records_reused: usize,
    /// Number of parent links written.
    pub links_created: usize,
}

/// Point-in-time view of an import job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobStatus {
    pub job_id: String,
    pub obs_id: String,
    pub stage: ImportStage,
    /// Overall progress, 0-100.
    pub progress: u8,
    pub message: String,
    pub is_complete: bool,
    pub is_cancelled: bool,
    pub is_resumable: bool,
    /// Engine-side transfer id, once known.
    pub download_job_id: Option<String>,
    pub byte_progress: ByteProgress,
    /// Populated only on success.
    pub result: Option<ImportResult>,
    /// Failure description, populated only on failure.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages() {
        assert!(!ImportStage::Starting.is_terminal());
        assert!(!ImportStage::Downloading.is_terminal());
        assert!(!ImportStage::SavingRecords.is_terminal());
        assert!(ImportStage::Complete.is_terminal());
        assert!(ImportStage::Failed.is_terminal());
    }

    #[test]
    fn stages_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ImportStage::SavingRecords).unwrap(),
            "\"saving_records\""
        );
        assert!(ImportStage::Starting < ImportStage::Downloading);
        assert!(ImportStage::Downloading < ImportStage::SavingRecords);
    }

    #[test]
    fn request_defaults_to_auto_source() {
        let request: ImportRequest =
            serde_json::from_value(serde_json::json!({ "obsId": "jw02733-o001_t001_nircam" }))
                .unwrap();
        assert_eq!(request.source, SourcePreference::Auto);
        assert!(request.owner_id.is_none());
    }

    #[test]
    fn lineage_tree_keys_are_level_names() {
        let mut result = ImportResult::default();
        result
            .lineage_tree
            .insert(ProcessingLevel::L2a, vec!["b".to_string()]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["lineageTree"]["L2a"][0], "b");
    }
}
