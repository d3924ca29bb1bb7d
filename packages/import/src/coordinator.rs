//! Import orchestration: the background task that drives one job from
//! transfer start to completed catalog records.
//!
//! A job runs through `Starting -> Downloading -> SavingRecords ->
//! Complete`. Any phase can end in `Failed`, and cancellation can land at
//! any point. The task checks the job's cancellation token before every
//! registry write and returns quietly once it fires, leaving the state the
//! canceller set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use jwst_archive::ArchiveEngine;
use jwst_archive_models::{DownloadProgress, DownloadRequest, DownloadSource, ResumableDownload};
use jwst_catalog::{CatalogStore, FileStorage, ThumbnailQueue};
use jwst_import_models::{ByteProgress, ImportJobStatus, ImportRequest, ImportResult, ImportStage};
use serde_json::Map;
use tokio_util::sync::CancellationToken;

use crate::files::list_observation_files;
use crate::lineage::link_lineage;
use crate::materialize::{MaterializeContext, Materialized, materialize};
use crate::progress::BandProgress;
use crate::registry::JobRegistry;
use crate::validation::{is_valid_obs_id, observation_dir, validate_obs_id};
use crate::{ImportConfig, ImportError};

/// Percent band of the transfer phase.
pub const DOWNLOAD_BAND: (u8, u8) = (10, 40);
/// Percent band of record materialization.
pub const MATERIALIZE_BAND: (u8, u8) = (45, 90);
/// Progress once lineage linking starts.
pub const LINEAGE_PERCENT: u8 = 90;
/// Progress once lineage linking is done.
pub const FINALIZE_PERCENT: u8 = 95;

/// Identifiers returned when a job is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedImport {
    pub job_id: String,
    pub obs_id: String,
}

/// Result of checking for already-downloaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckFiles {
    pub exists: bool,
    pub file_count: usize,
}

/// What a job needs to know about the import it is running.
#[derive(Debug, Clone)]
pub(crate) struct JobContext {
    pub job_id: String,
    pub obs_id: String,
    pub owner_id: Option<String>,
    pub product_types: Option<Vec<String>>,
    pub calib_levels: Option<Vec<u8>>,
}

impl JobContext {
    pub fn new(job_id: String, request: ImportRequest) -> Self {
        Self {
            job_id,
            obs_id: request.obs_id,
            owner_id: request.owner_id,
            product_types: request.product_types,
            calib_levels: request.calib_levels,
        }
    }
}

/// Where a background task enters the pipeline.
#[derive(Debug)]
pub(crate) enum Entry {
    /// Start a transfer, trying each source in order.
    Start(Vec<DownloadSource>),
    /// Poll a transfer the engine is already running.
    Poll(String),
    /// Files are on disk; go straight to saving records.
    Save(Vec<PathBuf>),
}

/// How a single transfer ended.
#[derive(Debug)]
enum TransferOutcome {
    Completed(Vec<PathBuf>),
    Failed { message: String, resumable: bool },
    Empty,
    Cancelled,
}

/// Coordinates import jobs over shared collaborators.
///
/// Cheap to clone; every clone drives the same registry.
#[derive(Clone)]
pub struct ImportOrchestrator {
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) engine: Arc<dyn ArchiveEngine>,
    store: Arc<dyn CatalogStore>,
    storage: Arc<dyn FileStorage>,
    thumbnails: Arc<dyn ThumbnailQueue>,
    pub(crate) config: Arc<ImportConfig>,
    /// One lock per observation so dedup-then-create never interleaves.
    save_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl std::fmt::Debug for ImportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportOrchestrator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImportOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<JobRegistry>,
        engine: Arc<dyn ArchiveEngine>,
        store: Arc<dyn CatalogStore>,
        storage: Arc<dyn FileStorage>,
        thumbnails: Arc<dyn ThumbnailQueue>,
        config: ImportConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            storage,
            thumbnails,
            config: Arc::new(config),
            save_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Returns a snapshot of the job.
    #[must_use]
    pub fn status(&self, job_id: &str) -> Option<ImportJobStatus> {
        self.registry.get(job_id)
    }

    /// Returns snapshots of every job, newest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<ImportJobStatus> {
        self.registry.list()
    }

    /// Accepts an import and detaches a background task to run it.
    ///
    /// The identifier and its download directory are validated before
    /// the job is created; every later failure surfaces through the job
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Validation`] if the identifier is unsafe.
    pub fn start_import(&self, request: ImportRequest) -> Result<StartedImport, ImportError> {
        validate_obs_id(&request.obs_id)?;
        observation_dir(&self.config.download_root, &request.obs_id)?;

        let obs_id = request.obs_id.clone();
        let sources = self.config.sources_for(request.source);
        let job_id = self.registry.create(&obs_id);
        let token = self.claim(&job_id)?;

        log::info!(
            "Starting import {job_id} for {obs_id} (sources: {})",
            join_sources(&sources)
        );
        self.spawn_worker(
            JobContext::new(job_id.clone(), request),
            token,
            Entry::Start(sources),
        );
        Ok(StartedImport { job_id, obs_id })
    }

    /// Imports files already present in the observation's download
    /// directory, skipping the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Validation`] if the identifier is unsafe,
    /// or [`ImportError::NoFiles`] if nothing has been downloaded.
    pub async fn import_from_existing(&self, obs_id: &str) -> Result<StartedImport, ImportError> {
        let files = list_observation_files(&self.config.download_root, obs_id).await?;
        if files.is_empty() {
            return Err(ImportError::NoFiles {
                obs_id: obs_id.to_string(),
            });
        }

        let job_id = self.registry.create(obs_id);
        let token = self.claim(&job_id)?;
        self.registry.update_progress(
            &job_id,
            DOWNLOAD_BAND.1,
            ImportStage::Downloading,
            &format!("Found {} existing file(s)", files.len()),
        );

        log::info!(
            "Importing {} existing file(s) for {obs_id} as {job_id}",
            files.len()
        );
        self.spawn_worker(
            JobContext::new(job_id.clone(), ImportRequest::new(obs_id)),
            token,
            Entry::Save(files),
        );
        Ok(StartedImport {
            job_id,
            obs_id: obs_id.to_string(),
        })
    }

    /// Reports whether files for `obs_id` are already on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Validation`] if the identifier is unsafe.
    pub async fn check_files(&self, obs_id: &str) -> Result<CheckFiles, ImportError> {
        let files = list_observation_files(&self.config.download_root, obs_id).await?;
        Ok(CheckFiles {
            exists: !files.is_empty(),
            file_count: files.len(),
        })
    }

    /// Lists transfers the engine can resume.
    ///
    /// Entries whose observation id fails validation are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Archive`] if the engine cannot be reached.
    pub async fn list_resumable(&self) -> Result<Vec<ResumableDownload>, ImportError> {
        let mut jobs = self.engine.list_resumable().await?;
        jobs.retain(|job| {
            let valid = is_valid_obs_id(&job.obs_id);
            if !valid {
                log::warn!(
                    "Ignoring resumable transfer {} with invalid observation id {:?}",
                    job.job_id,
                    job.obs_id
                );
            }
            valid
        });
        Ok(jobs)
    }

    /// Cancels a running job and asks the engine to pause its transfer.
    ///
    /// The local cancellation is authoritative; the pause is best-effort
    /// and runs in the background.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::JobNotFound`] for an unknown job,
    /// [`ImportError::AlreadyComplete`] for a finished one, or
    /// [`ImportError::CancelRefused`] if the job finished concurrently.
    pub fn cancel(&self, job_id: &str) -> Result<(), ImportError> {
        let job = self
            .registry
            .get(job_id)
            .ok_or_else(|| ImportError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if job.is_complete {
            return Err(ImportError::AlreadyComplete {
                job_id: job_id.to_string(),
            });
        }
        if !self.registry.cancel(job_id) {
            return Err(ImportError::CancelRefused {
                job_id: job_id.to_string(),
            });
        }

        if let Some(download_job_id) = self.registry.get(job_id).and_then(|j| j.download_job_id) {
            self.spawn_pause(download_job_id);
        }
        Ok(())
    }

    /// Asks the engine to pause a transfer without waiting for the reply.
    fn spawn_pause(&self, download_job_id: String) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            match engine.pause(&download_job_id).await {
                Ok(()) => log::info!("Paused engine transfer {download_job_id}"),
                Err(e) => log::warn!("Failed to pause engine transfer {download_job_id}: {e}"),
            }
        });
    }

    /// Removes terminal jobs past the configured retention window.
    pub fn sweep_expired(&self) -> usize {
        self.config
            .job_retention
            .map_or(0, |retention| self.registry.sweep_expired(retention))
    }

    /// Spawns a task that sweeps expired jobs every `interval`.
    ///
    /// Returns `None` when no retention window is configured.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.job_retention.is_none() {
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep_expired();
            }
        }))
    }

    fn claim(&self, job_id: &str) -> Result<CancellationToken, ImportError> {
        self.registry
            .claim_worker(job_id)
            .ok_or_else(|| ImportError::AlreadyRunning {
                job_id: job_id.to_string(),
            })
    }

    /// Detaches the background task for a job whose worker slot is
    /// already claimed.
    ///
    /// Every exit path ends in the registry: errors fail the job, panics
    /// fail it with a generic message, and the worker slot is always
    /// released.
    pub(crate) fn spawn_worker(&self, job: JobContext, token: CancellationToken, entry: Entry) {
        let this = self.clone();
        tokio::spawn(async move {
            let job_id = job.job_id.clone();
            let inner = {
                let this = this.clone();
                tokio::spawn(async move { this.run(&job, &token, entry).await })
            };
            match inner.await {
                Ok(Ok(()) | Err(ImportError::Cancelled)) => {}
                Ok(Err(e)) => {
                    this.registry.fail(&job_id, &e.to_string());
                }
                Err(join_error) => {
                    log::error!("Import task for {job_id} aborted: {join_error}");
                    this.registry.fail(&job_id, "Import failed unexpectedly");
                }
            }
            this.registry.release_worker(&job_id);
        });
    }

    async fn run(
        &self,
        job: &JobContext,
        token: &CancellationToken,
        entry: Entry,
    ) -> Result<(), ImportError> {
        let files = match entry {
            Entry::Start(sources) => self.download(job, token, &sources).await?,
            Entry::Poll(download_job_id) => {
                let outcome = self.poll_transfer(&job.job_id, token, &download_job_id).await;
                self.settle(job, outcome)
            }
            Entry::Save(files) => Some(files),
        };
        match files {
            Some(files) => self.save_records(job, token, &files).await,
            None => Ok(()),
        }
    }

    /// Runs the `Starting` and `Downloading` phases.
    ///
    /// Returns `None` if the job already reached a terminal state.
    async fn download(
        &self,
        job: &JobContext,
        token: &CancellationToken,
        sources: &[DownloadSource],
    ) -> Result<Option<Vec<PathBuf>>, ImportError> {
        let job_id = job.job_id.as_str();
        let mut start_errors = Vec::new();

        for (index, &source) in sources.iter().enumerate() {
            if token.is_cancelled() {
                return Ok(None);
            }
            self.registry.update_progress(
                job_id,
                5,
                ImportStage::Starting,
                &format!("Starting download from {source}..."),
            );

            let request = DownloadRequest {
                obs_id: job.obs_id.clone(),
                product_types: job.product_types.clone(),
                calib_levels: job.calib_levels.clone(),
                source,
            };
            let started = match self.engine.start_download(&request).await {
                Ok(started) => started,
                Err(e) => {
                    log::warn!("Import {job_id}: could not start download from {source}: {e}");
                    start_errors.push(format!("{source}: {e}"));
                    continue;
                }
            };

            if token.is_cancelled() {
                // Cancelled while the start was in flight, so cancel never saw this id.
                log::info!(
                    "Import {job_id}: cancelled during start, pausing engine transfer {}",
                    started.job_id
                );
                self.spawn_pause(started.job_id);
                return Ok(None);
            }
            log::info!(
                "Import {job_id}: engine transfer {} started from {source}",
                started.job_id
            );
            self.registry.set_download_job_id(job_id, &started.job_id);
            self.registry.set_resumable(job_id, true);
            self.registry.update_progress(
                job_id,
                DOWNLOAD_BAND.0,
                ImportStage::Downloading,
                &format!("Downloading from {source}..."),
            );

            match self.poll_transfer(job_id, token, &started.job_id).await {
                TransferOutcome::Failed { message, .. }
                    if index + 1 < sources.len() && !token.is_cancelled() =>
                {
                    log::warn!(
                        "Import {job_id}: transfer from {source} failed ({message}), restarting from {}",
                        sources[index + 1]
                    );
                    start_errors.push(format!("{source}: {message}"));
                }
                outcome => return Ok(self.settle(job, outcome)),
            }
        }

        if token.is_cancelled() {
            return Ok(None);
        }
        self.registry.set_resumable(job_id, false);
        self.registry.fail(
            job_id,
            &format!(
                "Failed to start download from any source ({})",
                start_errors.join("; ")
            ),
        );
        Ok(None)
    }

    /// Applies a final transfer outcome to the registry. Returns the files
    /// to save when the transfer completed.
    fn settle(&self, job: &JobContext, outcome: TransferOutcome) -> Option<Vec<PathBuf>> {
        let job_id = job.job_id.as_str();
        match outcome {
            TransferOutcome::Completed(files) => Some(files),
            TransferOutcome::Cancelled => None,
            TransferOutcome::Empty => {
                self.registry.set_resumable(job_id, false);
                self.registry
                    .fail(job_id, &ImportError::EmptyDownload.to_string());
                None
            }
            TransferOutcome::Failed { message, resumable } => {
                self.registry.set_resumable(job_id, resumable);
                self.registry.fail(job_id, &message);
                None
            }
        }
    }

    /// Polls a transfer until it completes, fails, or the job is
    /// cancelled. There is no overall timeout.
    async fn poll_transfer(
        &self,
        job_id: &str,
        token: &CancellationToken,
        download_job_id: &str,
    ) -> TransferOutcome {
        loop {
            tokio::select! {
                () = token.cancelled() => return TransferOutcome::Cancelled,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let progress = match self.engine.progress(download_job_id).await {
                Ok(progress) => progress,
                Err(e) if e.is_not_found() => {
                    return TransferOutcome::Failed {
                        message: format!(
                            "Download {download_job_id} is no longer known to the engine"
                        ),
                        resumable: true,
                    };
                }
                Err(e) => {
                    log::warn!("Import {job_id}: progress poll failed, retrying: {e}");
                    continue;
                }
            };

            if token.is_cancelled() {
                return TransferOutcome::Cancelled;
            }
            self.registry
                .update_byte_progress(job_id, byte_progress(&progress));

            if progress.is_failed() {
                let message = progress
                    .error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .or_else(|| Some(progress.message.clone()).filter(|m| !m.is_empty()))
                    .unwrap_or_else(|| "Download failed".to_string());
                return TransferOutcome::Failed {
                    message,
                    resumable: progress.is_resumable,
                };
            }

            if progress.is_complete {
                if progress.files.is_empty() {
                    return TransferOutcome::Empty;
                }
                log::info!(
                    "Import {job_id}: transfer {download_job_id} complete with {} file(s)",
                    progress.files.len()
                );
                return TransferOutcome::Completed(
                    progress.files.iter().map(PathBuf::from).collect(),
                );
            }

            self.registry.update_progress(
                job_id,
                download_percent(progress.progress),
                ImportStage::Downloading,
                &download_message(&progress),
            );
        }
    }

    fn save_lock(&self, obs_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.save_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(obs_id.to_string()).or_default())
    }

    /// Drops the observation's lock entry once nobody else is waiting on it.
    fn release_save_lock(&self, obs_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.save_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(lock) == 2 {
            locks.remove(obs_id);
        }
    }

    /// Creates or reuses the records for `files` and links their lineage.
    ///
    /// Callers hold the observation's save lock.
    async fn materialize_and_link(
        &self,
        job_id: &str,
        files: &[PathBuf],
        ctx: MaterializeContext<'_>,
        band: &BandProgress,
        token: &CancellationToken,
    ) -> Result<(Materialized, usize), ImportError> {
        let materialized = materialize(
            self.store.as_ref(),
            self.storage.as_ref(),
            files,
            ctx,
            band,
            token,
        )
        .await?;

        if token.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        self.registry.update_progress(
            job_id,
            LINEAGE_PERCENT,
            ImportStage::SavingRecords,
            "Linking processing lineage...",
        );
        let links_created = link_lineage(self.store.as_ref(), &materialized.record_ids).await?;
        Ok((materialized, links_created))
    }

    /// Runs the `SavingRecords` phase and completes the job.
    async fn save_records(
        &self,
        job: &JobContext,
        token: &CancellationToken,
        files: &[PathBuf],
    ) -> Result<(), ImportError> {
        let job_id = job.job_id.as_str();
        if token.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        self.registry.update_progress(
            job_id,
            MATERIALIZE_BAND.0,
            ImportStage::SavingRecords,
            &format!("Saving {} record(s)...", files.len()),
        );

        let archive_metadata = match self.engine.observation_metadata(&job.obs_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("Import {job_id}: no archive metadata for {}: {e}", job.obs_id);
                Map::new()
            }
        };

        let band = BandProgress::new(
            Arc::clone(&self.registry),
            job_id,
            ImportStage::SavingRecords,
            MATERIALIZE_BAND,
            token.clone(),
        );
        let ctx = MaterializeContext {
            obs_id: &job.obs_id,
            owner_id: job.owner_id.as_deref(),
            download_root: &self.config.download_root,
            archive_metadata: &archive_metadata,
            metadata_prefix: &self.config.metadata_prefix,
            provenance_tag: &self.config.provenance_tag,
            imported_at: Utc::now(),
        };
        let save_lock = self.save_lock(&job.obs_id);
        let guard = save_lock.lock().await;
        let saved = self.materialize_and_link(job_id, files, ctx, &band, token).await;
        self.release_save_lock(&job.obs_id, &save_lock);
        drop(guard);
        let (materialized, links_created) = saved?;

        if token.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        self.registry.update_progress(
            job_id,
            FINALIZE_PERCENT,
            ImportStage::SavingRecords,
            "Finalizing import...",
        );

        if !materialized.new_viewable_ids.is_empty() {
            self.thumbnails.enqueue(materialized.new_viewable_ids.clone());
        }

        self.registry.complete(
            job_id,
            ImportResult {
                record_ids: materialized.record_ids,
                lineage_tree: materialized.lineage_tree,
                observation_base_id: materialized.observation_base_id,
                records_created: materialized.records_created,
                records_reused: materialized.records_reused,
                links_created,
            },
        );
        Ok(())
    }
}

fn byte_progress(progress: &DownloadProgress) -> ByteProgress {
    ByteProgress {
        downloaded_bytes: progress.downloaded_bytes,
        total_bytes: progress.total_bytes,
        speed_bytes_per_sec: progress.speed_bytes_per_sec,
        eta_seconds: progress.eta_seconds,
        files: progress.file_progress.clone(),
    }
}

/// Maps engine progress (0-100) onto the transfer band.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn download_percent(engine_progress: f64) -> u8 {
    let (start, end) = DOWNLOAD_BAND;
    if !engine_progress.is_finite() {
        return start;
    }
    let span = f64::from(end - start);
    let scaled = f64::from(start) + engine_progress.clamp(0.0, 100.0) * span / 100.0;
    (scaled.floor() as u8).clamp(start, end)
}

fn download_message(progress: &DownloadProgress) -> String {
    if progress.total_bytes > 0 {
        format!(
            "Downloading: {} / {} ({:.0}%)",
            format_bytes(progress.downloaded_bytes),
            format_bytes(progress.total_bytes),
            progress.progress
        )
    } else if !progress.message.is_empty() {
        progress.message.clone()
    } else {
        format!("Downloading ({:.0}%)", progress.progress)
    }
}

/// Formats a byte count with a binary unit suffix.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn join_sources(sources: &[DownloadSource]) -> String {
    sources
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
