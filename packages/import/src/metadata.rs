//! Conversion of archive metadata into catalog record metadata.

use chrono::{DateTime, Utc};
use jwst_catalog_models::{Metadata, MetadataValue, ProcessingLevel};
use serde_json::{Map, Value};

/// Value of the `source` provenance field.
pub const SOURCE_NAME: &str = "mast";

/// Builds a record's metadata map.
///
/// Every archive field is copied under `prefix`, converted to a closed
/// [`MetadataValue`] (nulls dropped). Provenance fields are added
/// unprefixed and take precedence.
#[must_use]
pub fn build_metadata(
    archive: &Map<String, Value>,
    prefix: &str,
    obs_id: &str,
    level: ProcessingLevel,
    imported_at: DateTime<Utc>,
) -> Metadata {
    let mut metadata: Metadata = archive
        .iter()
        .filter_map(|(key, value)| {
            MetadataValue::from_json(value).map(|v| (format!("{prefix}{key}"), v))
        })
        .collect();

    metadata.insert("source".to_string(), SOURCE_NAME.into());
    metadata.insert("import_date".to_string(), imported_at.to_rfc3339().into());
    metadata.insert("processing_level".to_string(), level.to_string().into());
    metadata.insert("obs_id".to_string(), obs_id.into());
    metadata
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn prefixes_archive_fields_and_adds_provenance() {
        let archive = json!({
            "target_name": "NGC 3324",
            "t_exptime": 1288.5,
            "calib_level": 3,
            "dataRights": null,
            "intentType": "science",
            "is_public": true,
        });
        let metadata = build_metadata(
            archive.as_object().unwrap(),
            "mast_",
            "jw02733-o001_t001_nircam",
            ProcessingLevel::L3,
            DateTime::<Utc>::UNIX_EPOCH,
        );

        assert_eq!(
            metadata.get("mast_target_name"),
            Some(&MetadataValue::Text("NGC 3324".to_string()))
        );
        assert_eq!(
            metadata.get("mast_t_exptime"),
            Some(&MetadataValue::Number(1288.5))
        );
        assert_eq!(
            metadata.get("mast_is_public"),
            Some(&MetadataValue::Bool(true))
        );
        assert!(!metadata.contains_key("mast_dataRights"));
        assert_eq!(metadata.get("source").and_then(MetadataValue::as_str), Some("mast"));
        assert_eq!(
            metadata.get("processing_level").and_then(MetadataValue::as_str),
            Some("L3")
        );
        assert!(metadata.contains_key("import_date"));
    }
}
