//! Thumbnail generation queue.

/// Fire-and-forget queue for thumbnail generation.
///
/// `enqueue` must not block and must not fail the caller; implementations
/// log their own errors.
pub trait ThumbnailQueue: Send + Sync {
    /// Requests thumbnails for the given record ids.
    fn enqueue(&self, record_ids: Vec<String>);
}

/// Queue that only logs requests. Used when no renderer is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogThumbnailQueue;

impl ThumbnailQueue for LogThumbnailQueue {
    fn enqueue(&self, record_ids: Vec<String>) {
        if !record_ids.is_empty() {
            log::info!("Queued {} record(s) for thumbnail generation", record_ids.len());
            log::debug!("Thumbnail record ids: {record_ids:?}");
        }
    }
}
