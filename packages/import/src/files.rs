//! Discovery of downloaded observation files on disk.

use std::path::{Path, PathBuf};

use crate::ImportError;
use crate::naming::is_known_format;
use crate::validation::{ensure_within_root, observation_dir};

/// Lists the catalogable files already downloaded for `obs_id`.
///
/// The identifier and the resolved directory are validated against
/// `root` before any filesystem access. A missing directory yields an
/// empty list. Returned paths are absolute and sorted.
///
/// # Errors
///
/// Returns [`ImportError::Validation`] for an unsafe identifier, or
/// [`ImportError::Io`] if the directory cannot be read.
pub async fn list_observation_files(
    root: &Path,
    obs_id: &str,
) -> Result<Vec<PathBuf>, ImportError> {
    let dir = observation_dir(root, obs_id)?;
    if !tokio::fs::try_exists(&dir).await? {
        log::debug!("No download directory for {obs_id} at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut pending = vec![dir];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_known_format)
            {
                files.push(path);
            }
        }
    }

    // Engine-reported and on-disk paths alike must stay below the root.
    let mut checked = Vec::with_capacity(files.len());
    for file in files {
        match ensure_within_root(root, &file) {
            Ok(path) => checked.push(path),
            Err(e) => log::warn!("Skipping {}: {e}", file.display()),
        }
    }
    checked.sort();
    Ok(checked)
}
