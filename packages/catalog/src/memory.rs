//! In-memory [`CatalogStore`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use jwst_catalog_models::{CatalogRecord, NewCatalogRecord};
use tokio::sync::RwLock;

use crate::{CatalogError, CatalogStore};

/// Catalog store backed by a map guarded by an async `RwLock`.
///
/// Contents are lost when the process exits. [`crate::FileCatalogStore`]
/// layers snapshot persistence on top of the same map.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    records: RwLock<BTreeMap<String, CatalogRecord>>,
}

impl MemoryCatalogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    /// Returns every record, ordered by id.
    pub async fn all(&self) -> Vec<CatalogRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
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
        let id = uuid::Uuid::new_v4().to_string();
        let record = record.into_record(id, chrono::Utc::now());
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, mut record: CatalogRecord) -> Result<(), CatalogError> {
        let mut records = self.records.write().await;
        let Some(slot) = records.get_mut(&record.id) else {
            return Err(CatalogError::NotFound { id: record.id });
        };
        record.updated_at = chrono::Utc::now();
        *slot = record;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use jwst_catalog_models::{DataType, Metadata, ProcessingLevel};

    use super::*;

    fn new_record(file_name: &str) -> NewCatalogRecord {
        NewCatalogRecord {
            file_name: file_name.to_string(),
            storage_key: format!("obs/{file_name}"),
            file_size: 10,
            file_format: "fits".to_string(),
            data_type: DataType::Image,
            processing_level: ProcessingLevel::L2b,
            is_viewable: true,
            observation_base_id: None,
            exposure_id: None,
            tags: vec!["mast-import".to_string()],
            metadata: Metadata::new(),
            owner_id: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_finds_by_file_name() {
        let store = MemoryCatalogStore::new();
        let a = store.create(new_record("a_cal.fits")).await.unwrap();
        let b = store.create(new_record("b_cal.fits")).await.unwrap();
        assert_ne!(a.id, b.id);

        let found = store.find_by_file_name("b_cal.fits").await.unwrap().unwrap();
        assert_eq!(found.id, b.id);
        assert!(store.find_by_file_name("c_cal.fits").await.unwrap().is_none());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn get_many_skips_missing_ids() {
        let store = MemoryCatalogStore::new();
        let a = store.create(new_record("a_cal.fits")).await.unwrap();
        let found = store
            .get_many(&[a.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let store = MemoryCatalogStore::new();
        let mut a = store.create(new_record("a_cal.fits")).await.unwrap();
        a.parent_id = Some("p".to_string());
        store.update(a.clone()).await.unwrap();
        assert_eq!(
            store.get(&a.id).await.unwrap().unwrap().parent_id.as_deref(),
            Some("p")
        );

        a.id = "missing".to_string();
        assert!(matches!(
            store.update(a).await,
            Err(CatalogError::NotFound { .. })
        ));
    }
}
