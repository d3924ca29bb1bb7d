//! [`ArchiveEngine`] over the engine's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use jwst_archive_models::{
    DownloadProgress, DownloadRequest, DownloadStarted, ResumableDownload, ResumableList,
};
use reqwest::Url;
use serde::Deserialize;

use crate::retry::{self, DEFAULT_MAX_RETRIES};
use crate::{ArchiveEngine, ArchiveError};

/// Per-request timeout. Engine calls are control-plane only; bulk data
/// never flows through this client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the archive-processing engine.
#[derive(Debug, Clone)]
pub struct HttpArchiveEngine {
    client: reqwest::Client,
    base_url: Url,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl HttpArchiveEngine {
    /// Creates a client for the engine at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidUrl`] if `base_url` does not parse,
    /// or [`ArchiveError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ArchiveError> {
        let base_url = Url::parse(base_url).map_err(|e| ArchiveError::InvalidUrl {
            message: format!("{base_url}: {e}"),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ArchiveError::InvalidUrl {
                message: format!("{base_url} cannot be a base URL"),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Overrides the retry budget for control-plane calls.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builds `{base}/mast/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ArchiveError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ArchiveError::InvalidUrl {
                message: format!("{} cannot be a base URL", self.base_url),
            })?
            .pop_if_empty()
            .push("mast")
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ArchiveEngine for HttpArchiveEngine {
    async fn start_download(
        &self,
        request: &DownloadRequest,
    ) -> Result<DownloadStarted, ArchiveError> {
        let url = self.endpoint(&["download", "start"])?;
        log::debug!("Starting {} download for {}", request.source, request.obs_id);
        retry::send_json(|| self.client.post(url.clone()).json(request), self.max_retries).await
    }

    async fn progress(&self, download_job_id: &str) -> Result<DownloadProgress, ArchiveError> {
        let url = self.endpoint(&["download", "progress", download_job_id])?;
        retry::send_once(|| self.client.get(url.clone())).await
    }

    async fn pause(&self, download_job_id: &str) -> Result<(), ArchiveError> {
        let url = self.endpoint(&["download", "pause", download_job_id])?;
        let _: serde_json::Value =
            retry::send_json(|| self.client.post(url.clone()), self.max_retries).await?;
        Ok(())
    }

    async fn resume(&self, download_job_id: &str) -> Result<DownloadStarted, ArchiveError> {
        let url = self.endpoint(&["download", "resume", download_job_id])?;
        retry::send_json(|| self.client.post(url.clone()), self.max_retries).await
    }

    async fn list_resumable(&self) -> Result<Vec<ResumableDownload>, ArchiveError> {
        let url = self.endpoint(&["download", "resumable"])?;
        let list: ResumableList =
            retry::send_json(|| self.client.get(url.clone()), self.max_retries).await?;
        Ok(list.jobs)
    }

    async fn observation_metadata(
        &self,
        obs_id: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ArchiveError> {
        let url = self.endpoint(&["search", "obs_id"])?;
        let body = serde_json::json!({ "obs_id": obs_id });
        let response: SearchResponse =
            retry::send_json(|| self.client.post(url.clone()).json(&body), self.max_retries)
                .await?;
        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ArchiveError::NotFound {
                resource: format!("observation {obs_id}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_endpoints_under_base_path() {
        let engine = HttpArchiveEngine::new("http://engine:8000/api/").unwrap();
        let url = engine.endpoint(&["download", "progress", "abc"]).unwrap();
        assert_eq!(url.as_str(), "http://engine:8000/api/mast/download/progress/abc");
    }

    #[test]
    fn encodes_ids_as_single_segments() {
        let engine = HttpArchiveEngine::new("http://engine:8000").unwrap();
        let url = engine.endpoint(&["download", "resume", "../admin?x=1"]).unwrap();
        assert_eq!(url.path(), "/mast/download/resume/..%2Fadmin%3Fx=1");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            HttpArchiveEngine::new("not a url"),
            Err(ArchiveError::InvalidUrl { .. })
        ));
    }
}
