//! Archive identifier and download path validation.
//!
//! Observation ids arrive from HTTP callers and from state persisted by
//! the engine, and are used to build filesystem paths. Every id is
//! checked against a structural allow-list, and every path built from one
//! is resolved and confirmed to stay below the download root. The path
//! check is repeated whenever a path is rebuilt from stored state, since
//! that state may predate the current rules.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Longest observation id accepted.
pub const MAX_OBS_ID_LEN: usize = 128;

/// `<program>-<observation>_<visit>_<instrument>[_extra...]`, e.g.
/// `jw02733-o001_t001_nircam_clear-f090w`.
static OBS_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^jw\d{5}-[a-z]\d{3,4}_[a-z]\d{3,4}_[a-z0-9]+(?:_[a-z0-9+\-]+)*$")
        .expect("valid regex")
});

/// Errors raised when an identifier or path fails validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The identifier does not match the allow-list pattern.
    #[error("Invalid observation id: {obs_id:?}")]
    InvalidObsId {
        /// The rejected identifier.
        obs_id: String,
    },

    /// The resolved path escapes the download root.
    #[error("Path {path:?} is outside the download root")]
    OutsideRoot {
        /// The offending path.
        path: PathBuf,
    },

    /// The path could not be resolved.
    #[error("Path {path:?} could not be resolved")]
    Unresolvable {
        /// The offending path.
        path: PathBuf,
    },
}

/// Returns whether `obs_id` is an acceptable archive identifier.
///
/// Empty or whitespace-only strings, anything containing `..`, `%`, or a
/// path separator, and anything not matching the structural pattern are
/// rejected.
#[must_use]
pub fn is_valid_obs_id(obs_id: &str) -> bool {
    if obs_id.is_empty() || obs_id.len() > MAX_OBS_ID_LEN {
        return false;
    }
    if obs_id.contains("..") || obs_id.contains(['%', '/', '\\']) {
        return false;
    }
    OBS_ID_RE.is_match(obs_id)
}

/// Validates `obs_id`, returning it unchanged on success.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidObsId`] if the id is rejected.
pub fn validate_obs_id(obs_id: &str) -> Result<&str, ValidationError> {
    if is_valid_obs_id(obs_id) {
        Ok(obs_id)
    } else {
        Err(ValidationError::InvalidObsId {
            obs_id: obs_id.to_string(),
        })
    }
}

/// Builds the download directory for `obs_id` below `root`.
///
/// The id is validated first; the returned path is the resolved absolute
/// directory, confirmed to lie strictly inside the resolved root.
///
/// # Errors
///
/// Returns [`ValidationError`] if the id is invalid or the path escapes
/// the root.
pub fn observation_dir(root: &Path, obs_id: &str) -> Result<PathBuf, ValidationError> {
    let obs_id = validate_obs_id(obs_id)?;
    ensure_within_root(root, Path::new(obs_id))
}

/// Resolves `path` and confirms it lies strictly inside `root`.
///
/// Relative paths are taken relative to `root`. Existing path prefixes
/// are canonicalized so symlinks cannot be used to escape.
///
/// # Errors
///
/// Returns [`ValidationError::OutsideRoot`] if the resolved path is not
/// below the resolved root, or [`ValidationError::Unresolvable`] if either
/// cannot be resolved.
pub fn ensure_within_root(root: &Path, path: &Path) -> Result<PathBuf, ValidationError> {
    let resolved_root = resolve(root)?;
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let resolved = resolve(&joined)?;

    if resolved != resolved_root && resolved.starts_with(&resolved_root) {
        Ok(resolved)
    } else {
        log::warn!(
            "Rejected path {} (resolved {}) outside root {}",
            path.display(),
            resolved.display(),
            resolved_root.display()
        );
        Err(ValidationError::OutsideRoot {
            path: path.to_path_buf(),
        })
    }
}

/// Returns the storage key (root-relative, `/`-separated) of a file.
///
/// # Errors
///
/// Returns [`ValidationError`] if the file is not below `root`.
pub fn storage_key(root: &Path, file: &Path) -> Result<String, ValidationError> {
    let resolved = ensure_within_root(root, file)?;
    let resolved_root = resolve(root)?;
    let relative = resolved
        .strip_prefix(&resolved_root)
        .map_err(|_| ValidationError::OutsideRoot {
            path: file.to_path_buf(),
        })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Makes `path` absolute, normalizes `.` and `..` lexically, then
/// canonicalizes the longest existing ancestor.
fn resolve(path: &Path) -> Result<PathBuf, ValidationError> {
    let absolute = std::path::absolute(path).map_err(|e| {
        log::debug!("Failed to absolutize {}: {e}", path.display());
        ValidationError::Unresolvable {
            path: path.to_path_buf(),
        }
    })?;
    let normalized = normalize_lexically(&absolute);

    for ancestor in normalized.ancestors() {
        if let Ok(canonical) = std::fs::canonicalize(ancestor) {
            let rest = normalized.strip_prefix(ancestor).unwrap_or_else(|_| Path::new(""));
            return Ok(if rest.as_os_str().is_empty() {
                canonical
            } else {
                canonical.join(rest)
            });
        }
    }

    Ok(normalized)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!("jwst-validate-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn accepts_structural_ids() {
        for id in [
            "jw02733-o001_t001_nircam",
            "jw02733-o001_t001_nircam_clear-f090w",
            "JW01234-O002_T003_MIRI",
            "jw01345-c1001_t021_nircam_f444w-f470n",
        ] {
            assert!(is_valid_obs_id(id), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_traversal_and_malformed_ids() {
        for id in [
            "",
            "   ",
            "jw02733-o001_t001_nircam/../etc",
            "..",
            "jw02733-o001_t001_nircam..",
            "jw02733-o001_t001_%2e%2e",
            "jw02733-o001_t001_nircam%2F",
            "jw02733-o001_t001_nircam\\x",
            "jw02733-o001_t001",
            "jw02733_o001_t001_nircam",
            " jw02733-o001_t001_nircam",
            "jw02733-o001_t001_nircam\n",
            "jw02733-o001_t001_nircam.fits",
            "hst_12345_01_wfc3",
        ] {
            assert!(!is_valid_obs_id(id), "{id:?} should be invalid");
        }
    }

    #[test]
    fn rejects_overlong_ids() {
        let id = format!("jw02733-o001_t001_{}", "a".repeat(MAX_OBS_ID_LEN));
        assert!(!is_valid_obs_id(&id));
    }

    #[test]
    fn observation_dir_stays_inside_root() {
        let root = temp_root();
        let dir = observation_dir(&root, "jw02733-o001_t001_nircam").unwrap();
        assert!(dir.starts_with(std::fs::canonicalize(&root).unwrap()));
        assert!(dir.ends_with("jw02733-o001_t001_nircam"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn invalid_id_never_builds_a_path() {
        let root = temp_root();
        assert!(matches!(
            observation_dir(&root, "../../etc"),
            Err(ValidationError::InvalidObsId { .. })
        ));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn rejects_paths_escaping_root() {
        let root = temp_root();
        assert!(matches!(
            ensure_within_root(&root, Path::new("a/../../outside")),
            Err(ValidationError::OutsideRoot { .. })
        ));
        assert!(matches!(
            ensure_within_root(&root, Path::new("/etc/passwd")),
            Err(ValidationError::OutsideRoot { .. })
        ));
        assert!(matches!(
            ensure_within_root(&root, &root),
            Err(ValidationError::OutsideRoot { .. })
        ));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn storage_keys_are_root_relative() {
        let root = temp_root();
        let obs = root.join("jw02733-o001_t001_nircam");
        std::fs::create_dir_all(&obs).unwrap();
        std::fs::write(obs.join("a_cal.fits"), b"x").unwrap();

        assert_eq!(
            storage_key(&root, &obs.join("a_cal.fits")).unwrap(),
            "jw02733-o001_t001_nircam/a_cal.fits"
        );
        assert_eq!(
            storage_key(&root, Path::new("jw02733-o001_t001_nircam/./b_cal.fits")).unwrap(),
            "jw02733-o001_t001_nircam/b_cal.fits"
        );
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(
            normalize_lexically(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }
}
