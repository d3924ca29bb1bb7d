//! In-memory registry of import jobs.
//!
//! The registry is the only state shared between HTTP handlers and the
//! background tasks that drive imports. Each job lives behind its own
//! mutex; the outer map lock is held only to find or insert entries.
//!
//! Terminal state is sticky: once a job is complete (successfully,
//! failed, or cancelled) every progress mutation is ignored, so a worker
//! that has not yet observed cancellation cannot overwrite the state the
//! canceller set. Resuming a terminal job installs a fresh record under
//! the same id via [`JobRegistry::reopen`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use jwst_import_models::{ByteProgress, ImportJobStatus, ImportResult, ImportStage};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};

/// Message set on a cancelled job.
pub const CANCELLED_MESSAGE: &str = "Import cancelled";

#[derive(Debug)]
struct JobEntry {
    status: ImportJobStatus,
    cancel: CancellationToken,
    worker_active: bool,
}

/// Why [`JobRegistry::reopen`] refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenRefusal {
    /// No job has this id.
    NotFound,
    /// The job finished successfully.
    AlreadyComplete,
    /// A background task is still attached to the job.
    WorkerActive,
}

/// Concurrent store of [`ImportJobStatus`] records.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Mutex<JobEntry>>>>,
    clock: Arc<dyn Clock>,
    max_jobs: Option<usize>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("max_jobs", &self.max_jobs)
            .finish_non_exhaustive()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), None)
    }
}

fn lock(entry: &Mutex<JobEntry>) -> MutexGuard<'_, JobEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, max_jobs: Option<usize>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
            max_jobs,
        }
    }

    fn entry(&self, job_id: &str) -> Option<Arc<Mutex<JobEntry>>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    /// Applies `f` to a non-terminal job. Returns `false` if the job is
    /// unknown or already terminal.
    fn mutate_active(&self, job_id: &str, f: impl FnOnce(&mut ImportJobStatus)) -> bool {
        let Some(entry) = self.entry(job_id) else {
            return false;
        };
        let mut entry = lock(&entry);
        if entry.status.is_complete {
            return false;
        }
        f(&mut entry.status);
        entry.status.updated_at = self.clock.now();
        true
    }

    /// Registers a new job for `obs_id` and returns its id.
    pub fn create(&self, obs_id: &str) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = self.clock.now();
        let status = ImportJobStatus {
            job_id: job_id.clone(),
            obs_id: obs_id.to_string(),
            stage: ImportStage::Starting,
            progress: 0,
            message: "Starting import...".to_string(),
            is_complete: false,
            is_cancelled: false,
            is_resumable: false,
            download_job_id: None,
            byte_progress: ByteProgress::default(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let entry = JobEntry {
            status,
            cancel: CancellationToken::new(),
            worker_active: false,
        };

        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(max) = self.max_jobs {
            while jobs.len() >= max {
                if !evict_oldest_terminal(&mut jobs) {
                    log::warn!("Job registry over capacity ({max}) with no terminal jobs to evict");
                    break;
                }
            }
        }
        jobs.insert(job_id.clone(), Arc::new(Mutex::new(entry)));
        log::info!("Created import job {job_id} for {obs_id}");
        job_id
    }

    /// Returns a snapshot of the job.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<ImportJobStatus> {
        self.entry(job_id).map(|e| lock(&e).status.clone())
    }

    /// Returns snapshots of every job, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<ImportJobStatus> {
        let entries: Vec<_> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut jobs: Vec<ImportJobStatus> =
            entries.iter().map(|e| lock(e).status.clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Number of jobs held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the registry holds no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels a running job.
    ///
    /// Fires the job's cancellation token and moves it to a terminal
    /// `Failed` state. Returns `false` if the job is unknown or already
    /// terminal.
    pub fn cancel(&self, job_id: &str) -> bool {
        let Some(entry) = self.entry(job_id) else {
            return false;
        };
        let mut entry = lock(&entry);
        if entry.status.is_complete {
            return false;
        }
        entry.cancel.cancel();
        let now = self.clock.now();
        let status = &mut entry.status;
        status.stage = ImportStage::Failed;
        status.is_complete = true;
        status.is_cancelled = true;
        status.message = CANCELLED_MESSAGE.to_string();
        status.error = Some(CANCELLED_MESSAGE.to_string());
        status.updated_at = now;
        status.completed_at = Some(now);
        log::info!("Cancelled import job {job_id} ({})", status.obs_id);
        true
    }

    /// Updates coarse progress.
    ///
    /// Progress never decreases and stages never move backwards; terminal
    /// stages must be set through [`Self::complete`] or [`Self::fail`].
    /// Ignored once the job is terminal.
    pub fn update_progress(&self, job_id: &str, percent: u8, stage: ImportStage, message: &str) {
        if stage.is_terminal() {
            log::debug!("Ignoring terminal stage {stage} passed to update_progress for {job_id}");
            return;
        }
        self.mutate_active(job_id, |status| {
            status.progress = status.progress.max(percent.min(100));
            if stage > status.stage {
                log::info!("Import job {job_id}: {} -> {stage}", status.stage);
                status.stage = stage;
            }
            status.message = message.to_string();
        });
    }

    /// Replaces the advisory byte-level progress.
    pub fn update_byte_progress(&self, job_id: &str, progress: ByteProgress) {
        self.mutate_active(job_id, |status| status.byte_progress = progress);
    }

    /// Records the engine-side transfer id.
    pub fn set_download_job_id(&self, job_id: &str, download_job_id: &str) {
        self.mutate_active(job_id, |status| {
            status.download_job_id = Some(download_job_id.to_string());
        });
    }

    /// Sets whether the job may be resumed.
    ///
    /// Clearing the flag is allowed on terminal jobs; setting it is not.
    pub fn set_resumable(&self, job_id: &str, resumable: bool) {
        let Some(entry) = self.entry(job_id) else {
            return;
        };
        let mut entry = lock(&entry);
        if entry.status.is_complete && resumable {
            return;
        }
        entry.status.is_resumable = resumable;
        entry.status.updated_at = self.clock.now();
    }

    /// Marks the job complete with `result`. No-op if already terminal.
    pub fn complete(&self, job_id: &str, result: ImportResult) -> bool {
        let now = self.clock.now();
        let done = self.mutate_active(job_id, |status| {
            status.message = format!(
                "Import complete: {} record(s) ({} new, {} existing)",
                result.record_ids.len(),
                result.records_created,
                result.records_reused
            );
            status.stage = ImportStage::Complete;
            status.progress = 100;
            status.is_complete = true;
            status.is_resumable = false;
            status.result = Some(result);
            status.completed_at = Some(now);
        });
        if done {
            log::info!("Import job {job_id} complete");
        }
        done
    }

    /// Marks the job failed with `message`. No-op if already terminal.
    pub fn fail(&self, job_id: &str, message: &str) -> bool {
        let now = self.clock.now();
        let done = self.mutate_active(job_id, |status| {
            status.stage = ImportStage::Failed;
            status.is_complete = true;
            status.message = message.to_string();
            status.error = Some(message.to_string());
            status.completed_at = Some(now);
        });
        if done {
            log::error!("Import job {job_id} failed: {message}");
        }
        done
    }

    /// Permanently gives up on a job: clears `is_resumable`, fails it if
    /// still running, and records `message` as its final status.
    ///
    /// Returns `false` if the job is unknown or finished successfully.
    pub fn abandon(&self, job_id: &str, message: &str) -> bool {
        let Some(entry) = self.entry(job_id) else {
            return false;
        };
        let mut entry = lock(&entry);
        if entry.status.stage == ImportStage::Complete {
            return false;
        }
        let now = self.clock.now();
        let status = &mut entry.status;
        status.is_resumable = false;
        status.stage = ImportStage::Failed;
        status.message = message.to_string();
        status.error = Some(message.to_string());
        status.updated_at = now;
        if !status.is_complete {
            status.is_complete = true;
            status.completed_at = Some(now);
        }
        log::warn!("Abandoned import job {job_id}: {message}");
        true
    }

    /// Returns the job's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self, job_id: &str) -> Option<CancellationToken> {
        self.entry(job_id).map(|e| lock(&e).cancel.clone())
    }

    /// Attaches a background task to the job.
    ///
    /// Returns the job's cancellation token, or `None` if the job is
    /// unknown or already has a task attached.
    pub fn claim_worker(&self, job_id: &str) -> Option<CancellationToken> {
        let entry = self.entry(job_id)?;
        let mut entry = lock(&entry);
        if entry.worker_active {
            return None;
        }
        entry.worker_active = true;
        Some(entry.cancel.clone())
    }

    /// Detaches the background task from the job.
    pub fn release_worker(&self, job_id: &str) {
        if let Some(entry) = self.entry(job_id) {
            lock(&entry).worker_active = false;
        }
    }

    /// Whether a background task is attached to the job.
    #[must_use]
    pub fn has_worker(&self, job_id: &str) -> bool {
        self.entry(job_id).is_some_and(|e| lock(&e).worker_active)
    }

    /// Starts a new life cycle for an existing job and claims its worker
    /// slot.
    ///
    /// The job keeps its id, observation id, transfer id, and creation
    /// time; everything else is reset and a fresh cancellation token is
    /// issued. Used by resume, which may target a failed or cancelled job.
    ///
    /// # Errors
    ///
    /// Returns [`ReopenRefusal`] if the job is unknown, finished
    /// successfully, or still has a task attached.
    pub fn reopen(
        &self,
        job_id: &str,
        stage: ImportStage,
        percent: u8,
        message: &str,
    ) -> Result<CancellationToken, ReopenRefusal> {
        let entry = self.entry(job_id).ok_or(ReopenRefusal::NotFound)?;
        let mut entry = lock(&entry);
        if entry.status.stage == ImportStage::Complete {
            return Err(ReopenRefusal::AlreadyComplete);
        }
        if entry.worker_active {
            return Err(ReopenRefusal::WorkerActive);
        }

        let now = self.clock.now();
        let previous = &entry.status;
        let status = ImportJobStatus {
            job_id: previous.job_id.clone(),
            obs_id: previous.obs_id.clone(),
            stage,
            progress: percent.min(100),
            message: message.to_string(),
            is_complete: false,
            is_cancelled: false,
            is_resumable: previous.download_job_id.is_some(),
            download_job_id: previous.download_job_id.clone(),
            byte_progress: ByteProgress::default(),
            result: None,
            error: None,
            created_at: previous.created_at,
            updated_at: now,
            completed_at: None,
        };

        let token = CancellationToken::new();
        *entry = JobEntry {
            status,
            cancel: token.clone(),
            worker_active: true,
        };
        log::info!("Reopened import job {job_id} at {stage}");
        Ok(token)
    }

    /// Removes terminal jobs that completed more than `retention` ago and
    /// have no task attached. Returns how many were removed.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = self.clock.now() - retention;
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let entry = lock(entry);
            entry.worker_active
                || !entry.status.is_complete
                || entry.status.completed_at.is_none_or(|at| at > cutoff)
        });
        let removed = before - jobs.len();
        if removed > 0 {
            log::info!("Swept {removed} expired import job(s)");
        }
        removed
    }
}

/// Removes the terminal job with the oldest completion time. Returns
/// `false` if there is none.
fn evict_oldest_terminal(jobs: &mut HashMap<String, Arc<Mutex<JobEntry>>>) -> bool {
    let oldest = jobs
        .iter()
        .filter_map(|(id, entry)| {
            let entry = lock(entry);
            if entry.status.is_complete && !entry.worker_active {
                entry.status.completed_at.map(|at| (at, id.clone()))
            } else {
                None
            }
        })
        .min();
    oldest.is_some_and(|(_, id)| {
        log::debug!("Evicting import job {id} (registry at capacity)");
        jobs.remove(&id).is_some()
    })
}
