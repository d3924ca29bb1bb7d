//! Resuming interrupted imports.
//!
//! The registry only mirrors what the engine knows, and does not survive
//! a restart. A resume request is reconciled against three situations,
//! tried in order:
//!
//! 1. The job is known locally and the engine still has its transfer:
//!    resume the transfer and poll it again.
//! 2. The job is known locally but the engine has forgotten the transfer:
//!    if the files are already on disk, save records from them; otherwise
//!    the job is abandoned.
//! 3. The job is unknown locally: look for a matching transfer in the
//!    engine's persisted list and adopt it into a new job.

use jwst_import_models::{ImportJobStatus, ImportRequest, ImportStage};
use strum_macros::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;

use crate::ImportError;
use crate::coordinator::{
    DOWNLOAD_BAND, Entry, ImportOrchestrator, JobContext, MATERIALIZE_BAND, download_percent,
};
use crate::files::list_observation_files;
use crate::registry::ReopenRefusal;
use crate::validation::{observation_dir, validate_obs_id};

/// Message set on a job whose transfer and files are both gone.
pub const RESTART_MESSAGE: &str =
    "Download state was lost and no files were found on disk. Please restart the import.";

/// How a resume request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ResumeMode {
    /// The engine resumed the transfer.
    Transfer,
    /// The transfer had already finished; records are saved from disk.
    SaveExisting,
    /// A transfer known only to the engine was adopted into a new job.
    Recovered,
}

/// Outcome of a successful resume request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumedImport {
    /// Local job now driving the import. Differs from the requested id
    /// when a transfer was recovered.
    pub job_id: String,
    pub obs_id: String,
    pub mode: ResumeMode,
}

impl ImportOrchestrator {
    /// Resumes an import by local job id, engine transfer id, or
    /// observation id.
    ///
    /// # Errors
    ///
    /// - [`ImportError::AlreadyComplete`] if the job finished successfully.
    /// - [`ImportError::AlreadyRunning`] if a task is still driving it.
    /// - [`ImportError::NotResumable`] if it cannot be recovered.
    /// - [`ImportError::JobNotFound`] if neither the registry nor the
    ///   engine knows the id.
    /// - [`ImportError::Archive`] if the engine cannot be reached.
    pub async fn resume(&self, job_id: &str) -> Result<ResumedImport, ImportError> {
        match self.registry.get(job_id) {
            Some(job) => self.resume_local(job).await,
            None => self.resume_remote(job_id).await,
        }
    }

    async fn resume_local(&self, job: ImportJobStatus) -> Result<ResumedImport, ImportError> {
        let job_id = job.job_id.as_str();
        if job.stage == ImportStage::Complete {
            return Err(ImportError::AlreadyComplete {
                job_id: job_id.to_string(),
            });
        }
        if self.registry.has_worker(job_id) {
            return Err(ImportError::AlreadyRunning {
                job_id: job_id.to_string(),
            });
        }
        // Stored ids may predate the current validation rules.
        validate_obs_id(&job.obs_id)?;

        let download_job_id = match (&job.download_job_id, job.is_resumable) {
            (Some(id), true) => id.clone(),
            _ => {
                return Err(ImportError::NotResumable {
                    message: format!("Import job {job_id} cannot be resumed"),
                });
            }
        };

        match self.engine.resume(&download_job_id).await {
            Ok(_) => {
                let token = self.reopen(
                    job_id,
                    ImportStage::Downloading,
                    DOWNLOAD_BAND.0,
                    "Resuming download...",
                )?;
                log::info!("Resuming import {job_id} (engine transfer {download_job_id})");
                self.spawn_worker(
                    context(job_id, &job.obs_id),
                    token,
                    Entry::Poll(download_job_id),
                );
                Ok(ResumedImport {
                    job_id: job_id.to_string(),
                    obs_id: job.obs_id,
                    mode: ResumeMode::Transfer,
                })
            }
            Err(e) if e.is_not_found() => {
                log::info!(
                    "Engine no longer knows transfer {download_job_id} for {job_id}; checking disk"
                );
                let files = list_observation_files(&self.config.download_root, &job.obs_id).await?;
                if files.is_empty() {
                    self.registry.abandon(job_id, RESTART_MESSAGE);
                    return Err(ImportError::NotResumable {
                        message: RESTART_MESSAGE.to_string(),
                    });
                }

                let token = self.reopen(
                    job_id,
                    ImportStage::SavingRecords,
                    MATERIALIZE_BAND.0,
                    &format!("Found {} downloaded file(s), saving records...", files.len()),
                )?;
                self.spawn_worker(context(job_id, &job.obs_id), token, Entry::Save(files));
                Ok(ResumedImport {
                    job_id: job_id.to_string(),
                    obs_id: job.obs_id,
                    mode: ResumeMode::SaveExisting,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resume_remote(&self, requested: &str) -> Result<ResumedImport, ImportError> {
        let not_found = || ImportError::JobNotFound {
            job_id: requested.to_string(),
        };

        let transfer = self
            .list_resumable()
            .await?
            .into_iter()
            .find(|t| t.job_id == requested || t.obs_id == requested)
            .ok_or_else(not_found)?;
        observation_dir(&self.config.download_root, &transfer.obs_id)?;

        match self.engine.resume(&transfer.job_id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Err(not_found()),
            Err(e) => return Err(e.into()),
        }

        let job_id = self.registry.create(&transfer.obs_id);
        let token = self
            .registry
            .claim_worker(&job_id)
            .ok_or_else(|| ImportError::AlreadyRunning {
                job_id: job_id.clone(),
            })?;
        self.registry.set_download_job_id(&job_id, &transfer.job_id);
        self.registry.set_resumable(&job_id, true);
        self.registry.update_progress(
            &job_id,
            download_percent(transfer.progress_percent),
            ImportStage::Downloading,
            "Resuming download...",
        );

        log::info!(
            "Recovered engine transfer {} for {} as import {job_id}",
            transfer.job_id,
            transfer.obs_id
        );
        self.spawn_worker(
            context(&job_id, &transfer.obs_id),
            token,
            Entry::Poll(transfer.job_id),
        );
        Ok(ResumedImport {
            job_id,
            obs_id: transfer.obs_id,
            mode: ResumeMode::Recovered,
        })
    }

    fn reopen(
        &self,
        job_id: &str,
        stage: ImportStage,
        percent: u8,
        message: &str,
    ) -> Result<CancellationToken, ImportError> {
        self.registry
            .reopen(job_id, stage, percent, message)
            .map_err(|refusal| {
                let job_id = job_id.to_string();
                match refusal {
                    ReopenRefusal::NotFound => ImportError::JobNotFound { job_id },
                    ReopenRefusal::AlreadyComplete => ImportError::AlreadyComplete { job_id },
                    ReopenRefusal::WorkerActive => ImportError::AlreadyRunning { job_id },
                }
            })
    }
}

// The original request is not retained, so resumed jobs save records
// without an owner.
fn context(job_id: &str, obs_id: &str) -> JobContext {
    JobContext::new(job_id.to_string(), ImportRequest::new(obs_id))
}

#[cfg(test)]
mod tests {
    use jwst_import_models::SourcePreference;

    use super::*;
    use crate::test_support::{
        Harness, Script, ScriptedEngine, TempDir, wait_for_terminal, write_files,
    };

    const OBS: &str = "jw02733-o001_t001_nircam";
    const FILE: &str = "jw02733001001_02101_00001_nrcb1_cal.fits";

    /// Starts an S3-only import whose transfer fails resumably.
    async fn failed_resumable_job(harness: &Harness) -> String {
        harness
            .engine
            .replace_script("dl-s3-1", vec![Script::failed("connection reset", true)]);
        let started = harness
            .orchestrator
            .start_import(ImportRequest {
                source: SourcePreference::S3,
                ..ImportRequest::new(OBS)
            })
            .unwrap();
        let job = wait_for_terminal(harness.orchestrator.registry(), &started.job_id).await;
        assert_eq!(job.stage, ImportStage::Failed);
        assert!(job.is_resumable);
        started.job_id
    }

    #[tokio::test]
    async fn resumes_live_transfer() {
        let root = TempDir::new();
        let harness = Harness::new(ScriptedEngine::new(), root.path());
        let job_id = failed_resumable_job(&harness).await;

        let files = write_files(root.path(), OBS, &[FILE]);
        harness.engine.allow_resume("dl-s3-1");
        harness.engine.replace_script(
            "dl-s3-1",
            vec![
                Script::progress(80.0),
                Script::complete(files.iter().map(|p| p.display().to_string()).collect()),
            ],
        );

        let resumed = harness.orchestrator.resume(&job_id).await.unwrap();
        assert_eq!(resumed.mode, ResumeMode::Transfer);
        assert_eq!(resumed.job_id, job_id);

        let job = wait_for_terminal(harness.orchestrator.registry(), &job_id).await;
        assert_eq!(job.stage, ImportStage::Complete, "{}", job.message);
        assert_eq!(job.download_job_id.as_deref(), Some("dl-s3-1"));
        assert_eq!(harness.engine.resumed(), vec!["dl-s3-1".to_string()]);
        assert_eq!(harness.engine.started().len(), 1);
    }

    #[tokio::test]
    async fn saves_from_disk_when_engine_forgot_transfer() {
        let root = TempDir::new();
        let harness = Harness::new(ScriptedEngine::new(), root.path());
        let job_id = failed_resumable_job(&harness).await;
        write_files(root.path(), OBS, &[FILE]);

        let resumed = harness.orchestrator.resume(&job_id).await.unwrap();
        assert_eq!(resumed.mode, ResumeMode::SaveExisting);

        let job = wait_for_terminal(harness.orchestrator.registry(), &job_id).await;
        assert_eq!(job.stage, ImportStage::Complete, "{}", job.message);
        assert_eq!(job.result.unwrap().record_ids.len(), 1);
    }

    #[tokio::test]
    async fn abandons_when_transfer_and_files_are_gone() {
        let root = TempDir::new();
        let harness = Harness::new(ScriptedEngine::new(), root.path());
        let job_id = failed_resumable_job(&harness).await;

        let err = harness.orchestrator.resume(&job_id).await.unwrap_err();
        assert!(matches!(err, ImportError::NotResumable { .. }));

        let job = harness.orchestrator.status(&job_id).unwrap();
        assert!(!job.is_resumable);
        assert!(job.is_complete);
        assert_eq!(job.message, RESTART_MESSAGE);

        assert!(matches!(
            harness.orchestrator.resume(&job_id).await,
            Err(ImportError::NotResumable { .. })
        ));
    }

    #[tokio::test]
    async fn recovers_transfer_known_only_to_engine() {
        let root = TempDir::new();
        let files = write_files(root.path(), OBS, &[FILE]);
        let engine = ScriptedEngine::new()
            .with_resumable("dl-77", OBS)
            .script(
                "dl-77",
                vec![Script::complete(files.iter().map(|p| p.display().to_string()).collect())],
            );
        engine.allow_resume("dl-77");
        let harness = Harness::new(engine, root.path());

        let resumed = harness.orchestrator.resume("dl-77").await.unwrap();
        assert_eq!(resumed.mode, ResumeMode::Recovered);
        assert_ne!(resumed.job_id, "dl-77");
        assert_eq!(resumed.obs_id, OBS);

        let job = wait_for_terminal(harness.orchestrator.registry(), &resumed.job_id).await;
        assert_eq!(job.stage, ImportStage::Complete, "{}", job.message);
        assert_eq!(job.download_job_id.as_deref(), Some("dl-77"));
    }

    #[tokio::test]
    async fn recovers_by_observation_id() {
        let root = TempDir::new();
        let engine = ScriptedEngine::new()
            .with_resumable("dl-5", OBS)
            .script("dl-5", vec![Script::progress(10.0)]);
        engine.allow_resume("dl-5");
        let harness = Harness::new(engine, root.path());

        let resumed = harness.orchestrator.resume(OBS).await.unwrap();
        assert_eq!(resumed.mode, ResumeMode::Recovered);
        harness.orchestrator.cancel(&resumed.job_id).unwrap();
    }

    #[tokio::test]
    async fn unknown_everywhere_is_not_found() {
        let root = TempDir::new();
        let harness = Harness::new(ScriptedEngine::new().with_resumable("dl-1", OBS), root.path());
        assert!(matches!(
            harness.orchestrator.resume("nope").await,
            Err(ImportError::JobNotFound { .. })
        ));
        // Listed but no longer resumable on the engine.
        assert!(matches!(
            harness.orchestrator.resume("dl-1").await,
            Err(ImportError::JobNotFound { .. })
        ));
        assert!(harness.orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn completed_job_is_never_resumed() {
        let root = TempDir::new();
        write_files(root.path(), OBS, &[FILE]);
        let harness = Harness::new(ScriptedEngine::new(), root.path());
        let started = harness.orchestrator.import_from_existing(OBS).await.unwrap();
        wait_for_terminal(harness.orchestrator.registry(), &started.job_id).await;

        assert!(matches!(
            harness.orchestrator.resume(&started.job_id).await,
            Err(ImportError::AlreadyComplete { .. })
        ));
        assert!(harness.engine.resumed().is_empty());
    }

    #[tokio::test]
    async fn running_job_is_not_resumed_twice() {
        let root = TempDir::new();
        let engine = ScriptedEngine::new().script("dl-s3-1", vec![Script::progress(10.0)]);
        let harness = Harness::new(engine, root.path());
        let started = harness
            .orchestrator
            .start_import(ImportRequest::new(OBS))
            .unwrap();

        assert!(matches!(
            harness.orchestrator.resume(&started.job_id).await,
            Err(ImportError::AlreadyRunning { .. })
        ));
        harness.orchestrator.cancel(&started.job_id).unwrap();
    }

    #[tokio::test]
    async fn start_failure_is_not_resumable() {
        let root = TempDir::new();
        let harness = Harness::new(ScriptedEngine::new().unreachable(), root.path());
        let started = harness
            .orchestrator
            .start_import(ImportRequest::new(OBS))
            .unwrap();
        wait_for_terminal(harness.orchestrator.registry(), &started.job_id).await;

        assert!(matches!(
            harness.orchestrator.resume(&started.job_id).await,
            Err(ImportError::NotResumable { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_job_can_be_resumed() {
        let root = TempDir::new();
        let engine = ScriptedEngine::new().script("dl-s3-1", vec![Script::progress(20.0)]);
        engine.allow_resume("dl-s3-1");
        let harness = Harness::new(engine, root.path());
        let started = harness
            .orchestrator
            .start_import(ImportRequest::new(OBS))
            .unwrap();
        crate::test_support::wait_for(|| {
            harness
                .orchestrator
                .status(&started.job_id)
                .is_some_and(|j| j.download_job_id.is_some())
        })
        .await;
        harness.orchestrator.cancel(&started.job_id).unwrap();
        let cancelled = wait_for_terminal(harness.orchestrator.registry(), &started.job_id).await;
        assert!(cancelled.is_resumable);

        let resumed = harness.orchestrator.resume(&started.job_id).await.unwrap();
        assert_eq!(resumed.mode, ResumeMode::Transfer);
        let job = harness.orchestrator.status(&started.job_id).unwrap();
        assert!(!job.is_complete);
        assert!(!job.is_cancelled);
        assert_eq!(job.stage, ImportStage::Downloading);
        harness.orchestrator.cancel(&started.job_id).unwrap();
    }
}
