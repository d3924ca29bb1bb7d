//! Processing-lineage links between records of one exposure.
//!
//! Records sharing an exposure id form a single chain ordered by
//! processing level. Each record is linked to the nearest present level
//! below it, so an exposure with L1, L2b, and L3 products but no L2a
//! yields `L1 <- L2b <- L3`. Chains never cross exposures and branching
//! derivation is not modeled.

use std::collections::BTreeMap;

use jwst_catalog::CatalogStore;
use jwst_catalog_models::CatalogRecord;

use crate::ImportError;

/// Links the records in `record_ids` into per-exposure chains.
///
/// Records without an exposure id are left untouched. Returns the number
/// of records whose parent was set.
///
/// # Errors
///
/// Returns [`ImportError::Catalog`] if the store cannot be read or
/// updated.
pub async fn link_lineage(
    store: &dyn CatalogStore,
    record_ids: &[String],
) -> Result<usize, ImportError> {
    let records = store.get_many(record_ids).await?;

    let mut groups: BTreeMap<String, Vec<CatalogRecord>> = BTreeMap::new();
    for record in records {
        if let Some(exposure) = record.exposure_id.clone() {
            groups.entry(exposure).or_default().push(record);
        }
    }

    let mut links = 0;
    for (exposure, mut chain) in groups {
        chain.sort_by_key(|r| r.processing_level);
        let mut previous: Option<String> = None;
        for mut record in chain {
            if let Some(parent) = previous.replace(record.id.clone()) {
                log::debug!(
                    "Linking {} ({}) -> {parent} in {exposure}",
                    record.id,
                    record.processing_level
                );
                record.parent_id = Some(parent.clone());
                record.derived_from = vec![parent];
                store.update(record).await?;
                links += 1;
            }
        }
    }

    log::info!("Created {links} lineage link(s)");
    Ok(links)
}
