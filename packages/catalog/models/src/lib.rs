#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Catalog record types for JWST data files.
//!
//! A [`CatalogRecord`] is the document-store representation of a single
//! downloaded file. Records are created by the import pipeline and later
//! re-written when processing lineage is reconstructed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Position of a file in the JWST calibration pipeline.
///
/// Variant order is the lineage order: `L1 < L2a < L2b < L3 < Unknown`.
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
pub enum ProcessingLevel {
    /// Uncalibrated raw ramps.
    L1,
    /// Count-rate images (ramp fitted).
    L2a,
    /// Fully calibrated exposures.
    L2b,
    /// Combined / mosaicked products.
    L3,
    /// Level could not be determined from the filename.
    #[serde(rename = "unknown")]
    #[strum(serialize = "unknown")]
    Unknown,
}

impl ProcessingLevel {
    /// All levels in lineage order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::L1, Self::L2a, Self::L2b, Self::L3, Self::Unknown]
    }
}

/// Broad kind of data held by a file.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    /// Detector-level raw data.
    Raw,
    /// Two-dimensional image data.
    Image,
    /// Spectroscopic data (2-D, 3-D or extracted 1-D).
    Spectral,
    /// Source catalogs and tabular products.
    Catalog,
    /// Association and pool files describing how products combine.
    Association,
    /// Anything else.
    Other,
}

/// A single metadata value.
///
/// Archive metadata is schema-less. Values are narrowed to this closed
/// set when they enter the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Free text.
    Text(String),
}

impl MetadataValue {
    /// Converts an arbitrary JSON value into a [`MetadataValue`].
    ///
    /// Arrays and objects are kept as their JSON text. `null` yields
    /// `None`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Some(Self::Text(value.to_string()))
            }
        }
    }

    /// Returns the text value, if this is a [`MetadataValue::Text`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Flat metadata map stored on each record.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A catalog record as stored in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    /// Store-assigned identifier.
    pub id: String,
    /// Bare file name (no directories).
    pub file_name: String,
    /// Path of the file relative to the download root.
    pub storage_key: String,
    /// Size in bytes, `0` when the file could not be stat'ed.
    pub file_size: u64,
    /// File extension without the dot (e.g. `fits`).
    pub file_format: String,
    /// Kind of data in the file.
    pub data_type: DataType,
    /// Calibration level.
    pub processing_level: ProcessingLevel,
    /// Whether the front end can render this file.
    pub is_viewable: bool,
    /// Observation the file belongs to (e.g. `jw02733-o001`).
    pub observation_base_id: Option<String>,
    /// Exposure the file belongs to, used to group lineage chains.
    pub exposure_id: Option<String>,
    /// Immediate predecessor in the processing chain.
    pub parent_id: Option<String>,
    /// Records this one was derived from.
    pub derived_from: Vec<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Archive metadata plus import provenance.
    pub metadata: Metadata,
    /// Owner of the record, if the import named one.
    pub owner_id: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a [`CatalogRecord`].
///
/// The store assigns the id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCatalogRecord {
    pub file_name: String,
    pub storage_key: String,
    pub file_size: u64,
    pub file_format: String,
    pub data_type: DataType,
    pub processing_level: ProcessingLevel,
    pub is_viewable: bool,
    pub observation_base_id: Option<String>,
    pub exposure_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub owner_id: Option<String>,
}

impl NewCatalogRecord {
    /// Builds the stored record from these fields.
    #[must_use]
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> CatalogRecord {
        CatalogRecord {
            id,
            file_name: self.file_name,
            storage_key: self.storage_key,
            file_size: self.file_size,
            file_format: self.file_format,
            data_type: self.data_type,
            processing_level: self.processing_level,
            is_viewable: self.is_viewable,
            observation_base_id: self.observation_base_id,
            exposure_id: self.exposure_id,
            parent_id: None,
            derived_from: Vec::new(),
            tags: self.tags,
            metadata: self.metadata,
            owner_id: self.owner_id,
            created_at: now,
            updated_at: now,
        }
    }
}
