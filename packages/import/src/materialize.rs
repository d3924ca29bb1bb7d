//! Conversion of downloaded files into catalog records.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use jwst_catalog::{CatalogStore, FileStorage};
use jwst_catalog_models::{NewCatalogRecord, ProcessingLevel};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ImportError;
use crate::metadata::build_metadata;
use crate::naming::classify;
use crate::progress::ProgressCallback;
use crate::validation::storage_key;

/// Per-import inputs shared by every file in a batch.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeContext<'a> {
    pub obs_id: &'a str,
    pub owner_id: Option<&'a str>,
    pub download_root: &'a Path,
    pub archive_metadata: &'a Map<String, Value>,
    pub metadata_prefix: &'a str,
    pub provenance_tag: &'a str,
    pub imported_at: DateTime<Utc>,
}

/// Outcome of materializing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Materialized {
    /// Every record id for the batch, new or reused, without duplicates.
    pub record_ids: Vec<String>,
    pub lineage_tree: BTreeMap<ProcessingLevel, Vec<String>>,
    /// First observation base id found in the batch.
    pub observation_base_id: Option<String>,
    /// Newly created records that can be rendered as thumbnails.
    pub new_viewable_ids: Vec<String>,
    pub records_created: usize,
    pub records_reused: usize,
}

impl Materialized {
    fn add(&mut self, id: String, level: ProcessingLevel) {
        let ids = self.lineage_tree.entry(level).or_default();
        if !ids.contains(&id) {
            ids.push(id.clone());
        }
        if !self.record_ids.contains(&id) {
            self.record_ids.push(id);
        }
    }
}

/// Creates (or reuses) one catalog record per file.
///
/// Records are deduplicated by file name: an existing record with the
/// same name is reused and still appears in the returned id list and
/// lineage tree. Records created before a failure are left in place.
///
/// # Errors
///
/// Returns [`ImportError::Catalog`] if the store fails,
/// [`ImportError::Validation`] if a file lies outside the download root,
/// or [`ImportError::Cancelled`] if `token` fires between files.
pub async fn materialize(
    store: &dyn CatalogStore,
    storage: &dyn FileStorage,
    files: &[PathBuf],
    ctx: MaterializeContext<'_>,
    progress: &dyn ProgressCallback,
    token: &CancellationToken,
) -> Result<Materialized, ImportError> {
    let mut out = Materialized::default();
    let mut seen_names = BTreeSet::new();
    progress.set_total(files.len() as u64);

    for file in files {
        if token.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        let key = storage_key(ctx.download_root, file)?;
        let file_name = file
            .file_name()
            .map_or_else(|| key.clone(), |n| n.to_string_lossy().into_owned());
        let class = classify(&file_name);

        if out.observation_base_id.is_none() {
            out.observation_base_id.clone_from(&class.observation_base_id);
        }

        if let Some(existing) = store.find_by_file_name(&file_name).await? {
            log::debug!("Reusing record {} for {file_name}", existing.id);
            if seen_names.insert(file_name.clone()) {
                out.records_reused += 1;
            }
            out.add(existing.id, existing.processing_level);
            progress.inc(1, format!("Found existing record for {file_name}"));
            continue;
        }
        seen_names.insert(file_name.clone());

        let file_size = match storage.file_size(&key).await {
            Ok(size) => size,
            Err(e) => {
                log::warn!("Could not stat {key}: {e}");
                0
            }
        };

        let record = NewCatalogRecord {
            file_name: file_name.clone(),
            storage_key: key,
            file_size,
            file_format: class.file_format,
            data_type: class.data_type,
            processing_level: class.processing_level,
            is_viewable: class.is_viewable,
            observation_base_id: class.observation_base_id,
            exposure_id: class.exposure_id,
            tags: vec![ctx.provenance_tag.to_string(), ctx.obs_id.to_string()],
            metadata: build_metadata(
                ctx.archive_metadata,
                ctx.metadata_prefix,
                ctx.obs_id,
                class.processing_level,
                ctx.imported_at,
            ),
            owner_id: ctx.owner_id.map(str::to_string),
        };

        let created = store.create(record).await?;
        log::debug!(
            "Created record {} for {file_name} ({})",
            created.id,
            created.processing_level
        );
        out.records_created += 1;
        if created.is_viewable {
            out.new_viewable_ids.push(created.id.clone());
        }
        out.add(created.id, created.processing_level);
        progress.inc(1, format!("Saved {file_name}"));
    }

    log::info!(
        "Materialized {} file(s) for {}: {} created, {} reused",
        files.len(),
        ctx.obs_id,
        out.records_created,
        out.records_reused
    );
    Ok(out)
}
