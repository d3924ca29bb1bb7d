//! [`CatalogStore`] persisted as a single JSON snapshot.
//!
//! Every write rewrites the snapshot under the store's write lock, so the
//! file on disk always reflects a complete, consistent state. Suitable for
//! single-node deployments with catalogs in the thousands of records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jwst_catalog_models::{CatalogRecord, NewCatalogRecord};
use tokio::sync::RwLock;

use crate::{CatalogError, CatalogStore};

/// Catalog store whose contents survive restarts.
#[derive(Debug)]
pub struct FileCatalogStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, CatalogRecord>>,
}

impl FileCatalogStore {
    /// Opens the snapshot at `path`, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the snapshot exists but cannot be read
    /// or parsed.
    pub async fn open(path: &Path) -> Result<Self, CatalogError> {
        let records: Vec<CatalogRecord> = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        log::info!(
            "Opened catalog snapshot {} ({} records)",
            path.display(),
            records.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            records: RwLock::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<String, CatalogRecord>) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let snapshot: Vec<&CatalogRecord> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for FileCatalogStore {
    async fn get(&self, id: &str) -> Result<Option<CatalogRecord>, CatalogError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<CatalogRecord>, CatalogError> {
        let records = self.records.read().await;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn find_by_file_name(
        &self,
        file_name: &str,
    ) -> Result<Option<CatalogRecord>, CatalogError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.file_name == file_name)
            .cloned())
    }

    async fn create(&self, record: NewCatalogRecord) -> Result<CatalogRecord, CatalogError> {
        let record = record.into_record(uuid::Uuid::new_v4().to_string(), chrono::Utc::now());
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.persist(&records).await {
            records.remove(&record.id);
            return Err(e);
        }
        Ok(record)
    }

    async fn update(&self, mut record: CatalogRecord) -> Result<(), CatalogError> {
        let mut records = self.records.write().await;
        let Some(previous) = records.get(&record.id).cloned() else {
            return Err(CatalogError::NotFound { id: record.id });
        };
        record.updated_at = chrono::Utc::now();
        let id = record.id.clone();
        records.insert(id.clone(), record);
        if let Err(e) = self.persist(&records).await {
            records.insert(id, previous);
            return Err(e);
        }
        Ok(())
    }
}
