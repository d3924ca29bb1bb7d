//! Scripted collaborators for orchestrator tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jwst_archive::{ArchiveEngine, ArchiveError};
use jwst_archive_models::{
    DownloadProgress, DownloadRequest, DownloadSource, DownloadStarted, EngineStage,
    ResumableDownload,
};
use jwst_catalog::{CatalogError, CatalogStore, FileStorage, MemoryCatalogStore, ThumbnailQueue};
use jwst_catalog_models::{CatalogRecord, NewCatalogRecord};
use jwst_import_models::ImportJobStatus;
use serde_json::{Map, Value, json};

use crate::clock::Clock;
use crate::config::ImportConfig;
use crate::coordinator::ImportOrchestrator;
use crate::registry::JobRegistry;

/// Temporary directory removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("jwst-import-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Writes 4-byte placeholder files into `root/obs_id/` and returns their
/// paths.
pub fn write_files(root: &Path, obs_id: &str, names: &[&str]) -> Vec<PathBuf> {
    let dir = root.join(obs_id);
    std::fs::create_dir_all(&dir).unwrap();
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"FITS").unwrap();
            path
        })
        .collect()
}

/// One scripted engine reply to a progress poll.
#[derive(Debug, Clone)]
pub enum Script {
    Progress(DownloadProgress),
    NotFound,
    Unreachable,
}

impl Script {
    pub fn progress(percent: f64) -> Self {
        Self::Progress(DownloadProgress {
            stage: EngineStage::Downloading,
            progress: percent,
            downloaded_bytes: 1024,
            total_bytes: 4096,
            ..DownloadProgress::default()
        })
    }

    pub fn complete(files: Vec<String>) -> Self {
        Self::Progress(DownloadProgress {
            stage: EngineStage::Complete,
            progress: 100.0,
            is_complete: true,
            files,
            ..DownloadProgress::default()
        })
    }

    pub fn failed(error: &str, resumable: bool) -> Self {
        Self::Progress(DownloadProgress {
            stage: EngineStage::Failed,
            is_complete: true,
            error: Some(error.to_string()),
            is_resumable: resumable,
            ..DownloadProgress::default()
        })
    }
}

#[derive(Default)]
struct EngineState {
    unreachable: bool,
    start_delay: Option<Duration>,
    failing_sources: BTreeSet<String>,
    scripts: BTreeMap<String, VecDeque<Script>>,
    resumable_ids: BTreeSet<String>,
    listed: Vec<ResumableDownload>,
    next_id: u32,
    started: Vec<DownloadRequest>,
    paused: Vec<String>,
    resumed: Vec<String>,
}

/// [`ArchiveEngine`] that replays scripted progress per transfer id.
///
/// Successful starts are numbered `dl-<source>-<n>`. The last reply of a
/// script repeats forever; a transfer with no script stays pending.
#[derive(Default)]
pub struct ScriptedEngine {
    state: Mutex<EngineState>,
}

fn unavailable() -> ArchiveError {
    ArchiveError::Status {
        status: 503,
        message: "engine unavailable".to_string(),
    }
}

fn not_found(resource: &str) -> ArchiveError {
    ArchiveError::NotFound {
        resource: resource.to_string(),
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Every call fails as if the engine were down.
    pub fn unreachable(self) -> Self {
        self.with_state(|s| s.unreachable = true);
        self
    }

    /// Delays every `start_download` reply by `delay`.
    pub fn slow_start(self, delay: Duration) -> Self {
        self.with_state(|s| s.start_delay = Some(delay));
        self
    }

    pub fn fail_start(self, source: DownloadSource) -> Self {
        self.with_state(|s| s.failing_sources.insert(source.to_string()));
        self
    }

    pub fn script(self, download_job_id: &str, steps: Vec<Script>) -> Self {
        self.replace_script(download_job_id, steps);
        self
    }

    pub fn with_resumable(self, download_job_id: &str, obs_id: &str) -> Self {
        self.with_state(|s| {
            s.listed.push(ResumableDownload {
                job_id: download_job_id.to_string(),
                obs_id: obs_id.to_string(),
                downloaded_bytes: 1024,
                total_bytes: 4096,
                progress_percent: 25.0,
                status: "paused".to_string(),
                started_at: None,
            });
        });
        self
    }

    pub fn replace_script(&self, download_job_id: &str, steps: Vec<Script>) {
        self.with_state(|s| {
            s.scripts
                .insert(download_job_id.to_string(), steps.into_iter().collect());
        });
    }

    /// Makes `resume` succeed for this transfer. Without this, resume
    /// reports the transfer as unknown.
    pub fn allow_resume(&self, download_job_id: &str) {
        self.with_state(|s| s.resumable_ids.insert(download_job_id.to_string()));
    }

    pub fn started(&self) -> Vec<DownloadRequest> {
        self.with_state(|s| s.started.clone())
    }

    pub fn paused(&self) -> Vec<String> {
        self.with_state(|s| s.paused.clone())
    }

    pub fn resumed(&self) -> Vec<String> {
        self.with_state(|s| s.resumed.clone())
    }
}

#[async_trait]
impl ArchiveEngine for ScriptedEngine {
    async fn start_download(
        &self,
        request: &DownloadRequest,
    ) -> Result<DownloadStarted, ArchiveError> {
        let delay = self.with_state(|s| {
            s.started.push(request.clone());
            s.start_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            if s.unreachable || s.failing_sources.contains(&request.source.to_string()) {
                return Err(unavailable());
            }
            s.next_id += 1;
            Ok(DownloadStarted {
                job_id: format!("dl-{}-{}", request.source, s.next_id),
                obs_id: Some(request.obs_id.clone()),
                message: None,
            })
        })
    }

    async fn progress(&self, download_job_id: &str) -> Result<DownloadProgress, ArchiveError> {
        let step = self.with_state(|s| {
            if s.unreachable {
                return Script::Unreachable;
            }
            let Some(queue) = s.scripts.get_mut(download_job_id) else {
                return Script::Progress(DownloadProgress::default());
            };
            let next = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            next.unwrap_or(Script::NotFound)
        });
        match step {
            Script::Progress(mut progress) => {
                progress.job_id = download_job_id.to_string();
                Ok(progress)
            }
            Script::NotFound => Err(not_found(download_job_id)),
            Script::Unreachable => Err(unavailable()),
        }
    }

    async fn pause(&self, download_job_id: &str) -> Result<(), ArchiveError> {
        self.with_state(|s| s.paused.push(download_job_id.to_string()));
        Ok(())
    }

    async fn resume(&self, download_job_id: &str) -> Result<DownloadStarted, ArchiveError> {
        self.with_state(|s| {
            s.resumed.push(download_job_id.to_string());
            if s.unreachable {
                return Err(unavailable());
            }
            if !s.resumable_ids.contains(download_job_id) {
                return Err(not_found(download_job_id));
            }
            Ok(DownloadStarted {
                job_id: download_job_id.to_string(),
                obs_id: None,
                message: Some("Resumed".to_string()),
            })
        })
    }

    async fn list_resumable(&self) -> Result<Vec<ResumableDownload>, ArchiveError> {
        self.with_state(|s| {
            if s.unreachable {
                Err(unavailable())
            } else {
                Ok(s.listed.clone())
            }
        })
    }

    async fn observation_metadata(&self, obs_id: &str) -> Result<Map<String, Value>, ArchiveError> {
        match json!({
            "obs_id": obs_id,
            "target_name": "NGC-3324",
            "instrument_name": "NIRCAM/IMAGE",
            "t_exptime": 1288.5,
        }) {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// Storage whose stat calls always fail.
pub struct FailingStorage;

#[async_trait]
impl FileStorage for FailingStorage {
    async fn file_size(&self, _storage_key: &str) -> Result<u64, CatalogError> {
        Err(CatalogError::Io(std::io::Error::other("disk unavailable")))
    }
}

/// Catalog store whose every call fails.
pub struct FailingStore;

fn store_offline() -> CatalogError {
    CatalogError::Io(std::io::Error::other("store offline"))
}

#[async_trait]
impl CatalogStore for FailingStore {
    async fn get(&self, _id: &str) -> Result<Option<CatalogRecord>, CatalogError> {
        Err(store_offline())
    }

    async fn get_many(&self, _ids: &[String]) -> Result<Vec<CatalogRecord>, CatalogError> {
        Err(store_offline())
    }

    async fn find_by_file_name(
        &self,
        _file_name: &str,
    ) -> Result<Option<CatalogRecord>, CatalogError> {
        Err(store_offline())
    }

    async fn create(&self, _record: NewCatalogRecord) -> Result<CatalogRecord, CatalogError> {
        Err(store_offline())
    }

    async fn update(&self, _record: CatalogRecord) -> Result<(), CatalogError> {
        Err(store_offline())
    }
}

/// Thumbnail queue that records every batch.
#[derive(Default)]
pub struct RecordingThumbnails(Mutex<Vec<Vec<String>>>);

impl RecordingThumbnails {
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.0.lock().unwrap().clone()
    }
}

impl ThumbnailQueue for RecordingThumbnails {
    fn enqueue(&self, record_ids: Vec<String>) {
        self.0.lock().unwrap().push(record_ids);
    }
}

/// Clock that only moves when told to.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl Default for ManualClock {
    fn default() -> Self {
        Self(Mutex::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ))
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// An orchestrator wired to scripted collaborators.
pub struct Harness {
    pub orchestrator: ImportOrchestrator,
    pub engine: Arc<ScriptedEngine>,
    pub store: Arc<MemoryCatalogStore>,
    pub thumbnails: Arc<RecordingThumbnails>,
}

impl Harness {
    pub fn new(engine: ScriptedEngine, root: &Path) -> Self {
        let store = Arc::new(MemoryCatalogStore::new());
        Self::build(engine, root, store.clone(), store)
    }

    pub fn with_store(engine: ScriptedEngine, root: &Path, store: Arc<dyn CatalogStore>) -> Self {
        Self::build(engine, root, store, Arc::new(MemoryCatalogStore::new()))
    }

    fn build(
        engine: ScriptedEngine,
        root: &Path,
        store: Arc<dyn CatalogStore>,
        memory: Arc<MemoryCatalogStore>,
    ) -> Self {
        let engine = Arc::new(engine);
        let thumbnails = Arc::new(RecordingThumbnails::default());
        let config = ImportConfig {
            download_root: root.to_path_buf(),
            poll_interval: Duration::from_millis(5),
            ..ImportConfig::default()
        };
        let orchestrator = ImportOrchestrator::new(
            Arc::new(JobRegistry::default()),
            engine.clone(),
            store,
            Arc::new(jwst_catalog::LocalStorage::new(root)),
            thumbnails.clone(),
            config,
        );
        Self {
            orchestrator,
            engine,
            store: memory,
            thumbnails,
        }
    }
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Waits until the job is terminal and its task has let go of it.
pub async fn wait_for_terminal(registry: &JobRegistry, job_id: &str) -> ImportJobStatus {
    wait_for(|| {
        registry
            .get(job_id)
            .is_some_and(|job| job.is_complete && !registry.has_worker(job_id))
    })
    .await;
    registry.get(job_id).unwrap()
}
