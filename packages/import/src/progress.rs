//! Progress reporting for the phases of an import.
//!
//! Each phase reports in its own units (files materialized, bytes
//! transferred). [`BandProgress`] rescales those onto a slice of the job's
//! 0-100 percent so the registry sees a single monotonic number.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use jwst_import_models::ImportStage;
use tokio_util::sync::CancellationToken;

use crate::registry::JobRegistry;

/// Trait for reporting progress from long-running operations.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units, with a status message.
    fn inc(&self, delta: u64, msg: String);
}

/// A no-op [`ProgressCallback`].
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64, _msg: String) {}
}

/// Reports into a fixed percent band of one registry job.
///
/// Writes stop once the job's cancellation token fires.
pub struct BandProgress {
    registry: Arc<JobRegistry>,
    job_id: String,
    stage: ImportStage,
    start: u8,
    end: u8,
    token: CancellationToken,
    total: AtomicU64,
    position: AtomicU64,
}

impl BandProgress {
    /// Creates a reporter mapping `0..=total` onto `start..=end` percent.
    #[must_use]
    pub fn new(
        registry: Arc<JobRegistry>,
        job_id: impl Into<String>,
        stage: ImportStage,
        (start, end): (u8, u8),
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            job_id: job_id.into(),
            stage,
            start,
            end: end.max(start),
            token,
            total: AtomicU64::new(0),
            position: AtomicU64::new(0),
        }
    }

    fn percent(&self, position: u64) -> u8 {
        scale_into_band(position, self.total.load(Ordering::Relaxed), self.start, self.end)
    }
}

impl ProgressCallback for BandProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn inc(&self, delta: u64, msg: String) {
        let position = self.position.fetch_add(delta, Ordering::Relaxed) + delta;
        if self.token.is_cancelled() {
            return;
        }
        self.registry
            .update_progress(&self.job_id, self.percent(position), self.stage, &msg);
    }
}

/// Rescales `position / total` onto `start..=end`.
///
/// An unknown (zero) total maps to `start`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn scale_into_band(position: u64, total: u64, start: u8, end: u8) -> u8 {
    if total == 0 {
        return start;
    }
    let fraction = (position.min(total) as f64) / (total as f64);
    let span = f64::from(end.saturating_sub(start));
    let offset = (fraction * span).floor() as u8;
    start.saturating_add(offset).min(end)
}
