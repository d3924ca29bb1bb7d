//! Import orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use jwst_archive_models::DownloadSource;
use jwst_import_models::SourcePreference;

/// Default interval between engine progress polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll intervals read from the environment are clamped to this range.
pub const POLL_INTERVAL_RANGE: (Duration, Duration) =
    (Duration::from_millis(100), Duration::from_secs(2));

/// Tag added to every record created by an import.
pub const DEFAULT_PROVENANCE_TAG: &str = "mast-import";

/// Prefix applied to archive metadata keys.
pub const DEFAULT_METADATA_PREFIX: &str = "mast_";

/// Settings for the import orchestrator.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Directory the engine writes `<obsId>/` download directories into.
    pub download_root: PathBuf,
    /// Interval between progress polls.
    pub poll_interval: Duration,
    /// Source tried first under [`SourcePreference::Auto`].
    pub primary_source: DownloadSource,
    /// Source tried when the primary fails, if any.
    pub fallback_source: Option<DownloadSource>,
    /// Tag added to every created record.
    pub provenance_tag: String,
    /// Prefix for archive metadata keys.
    pub metadata_prefix: String,
    /// Terminal jobs older than this are swept. `None` keeps jobs for the
    /// life of the process.
    pub job_retention: Option<Duration>,
    /// Soft cap on registry size. On overflow the oldest terminal job is
    /// evicted.
    pub max_jobs: Option<usize>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("data/mast"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            primary_source: DownloadSource::S3,
            fallback_source: Some(DownloadSource::Http),
            provenance_tag: DEFAULT_PROVENANCE_TAG.to_string(),
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
            job_retention: None,
            max_jobs: None,
        }
    }
}

impl ImportConfig {
    /// Builds the configuration from `JWST_*` environment variables,
    /// falling back to defaults for unset or unparseable values.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let download_root = lookup("JWST_DOWNLOAD_ROOT")
            .map_or(defaults.download_root, PathBuf::from);

        let poll_interval = lookup("JWST_POLL_INTERVAL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(defaults.poll_interval, |ms| {
                Duration::from_millis(ms).clamp(POLL_INTERVAL_RANGE.0, POLL_INTERVAL_RANGE.1)
            });

        let primary_source = lookup("JWST_PRIMARY_SOURCE")
            .and_then(|v| parse_source("JWST_PRIMARY_SOURCE", &v))
            .unwrap_or(defaults.primary_source);

        let fallback_source = match lookup("JWST_FALLBACK_SOURCE") {
            Some(v) if v.trim().eq_ignore_ascii_case("none") => None,
            Some(v) => parse_source("JWST_FALLBACK_SOURCE", &v).or(defaults.fallback_source),
            None => defaults.fallback_source,
        }
        .filter(|fallback| *fallback != primary_source);

        let job_retention = lookup("JWST_JOB_RETENTION_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let max_jobs = lookup("JWST_MAX_JOBS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);

        Self {
            download_root,
            poll_interval,
            primary_source,
            fallback_source,
            job_retention,
            max_jobs,
            ..defaults
        }
    }

    /// Sources to try, in order, for the given preference.
    #[must_use]
    pub fn sources_for(&self, preference: SourcePreference) -> Vec<DownloadSource> {
        match preference {
            SourcePreference::Auto => std::iter::once(self.primary_source)
                .chain(self.fallback_source)
                .collect(),
            SourcePreference::S3 => vec![DownloadSource::S3],
            SourcePreference::Http => vec![DownloadSource::Http],
        }
    }
}

fn parse_source(key: &str, value: &str) -> Option<DownloadSource> {
    value.trim().parse().map_or_else(
        |_| {
            log::warn!("Ignoring {key}={value:?}: expected \"s3\" or \"http\"");
            None
        },
        Some,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> ImportConfig {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ImportConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.primary_source, DownloadSource::S3);
        assert_eq!(config.fallback_source, Some(DownloadSource::Http));
        assert_eq!(config.job_retention, None);
    }

    #[test]
    fn clamps_poll_interval() {
        assert_eq!(
            config_from(&[("JWST_POLL_INTERVAL_MS", "5")]).poll_interval,
            Duration::from_millis(100)
        );
        assert_eq!(
            config_from(&[("JWST_POLL_INTERVAL_MS", "60000")]).poll_interval,
            Duration::from_secs(2)
        );
        assert_eq!(
            config_from(&[("JWST_POLL_INTERVAL_MS", "abc")]).poll_interval,
            DEFAULT_POLL_INTERVAL
        );
    }

    #[test]
    fn fallback_can_be_disabled() {
        let config = config_from(&[("JWST_FALLBACK_SOURCE", "none")]);
        assert_eq!(config.fallback_source, None);
        assert_eq!(
            config.sources_for(SourcePreference::Auto),
            vec![DownloadSource::S3]
        );
    }

    #[test]
    fn fallback_equal_to_primary_is_dropped() {
        let config = config_from(&[
            ("JWST_PRIMARY_SOURCE", "http"),
            ("JWST_FALLBACK_SOURCE", "HTTP"),
        ]);
        assert_eq!(config.primary_source, DownloadSource::Http);
        assert_eq!(config.fallback_source, None);
    }

    #[test]
    fn auto_tries_primary_then_fallback() {
        let config = ImportConfig::default();
        assert_eq!(
            config.sources_for(SourcePreference::Auto),
            vec![DownloadSource::S3, DownloadSource::Http]
        );
        assert_eq!(
            config.sources_for(SourcePreference::Http),
            vec![DownloadSource::Http]
        );
    }

    #[test]
    fn reads_retention_and_cap() {
        let config = config_from(&[
            ("JWST_JOB_RETENTION_SECS", "3600"),
            ("JWST_MAX_JOBS", "0"),
        ]);
        assert_eq!(config.job_retention, Some(Duration::from_secs(3600)));
        assert_eq!(config.max_jobs, None);
    }
}
