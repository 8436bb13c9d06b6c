// Media fetch adapter trait and the per-job progress emitter

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::DownloadError;
use super::models::{FetchEvent, FetchRequest, JobId, JobPatch, JobStatus, MediaInfo};
use super::store::ProgressStore;
use super::utils::{format_speed, percent_of};

/// Callback handed to the adapter for managed downloads
pub type ProgressCallback = Arc<dyn Fn(FetchEvent) + Send + Sync>;

/// External extraction/download capability
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Name of the adapter (for logging)
    fn name(&self) -> &'static str;

    /// Resolve metadata and, when available, a direct stream URL without downloading
    async fn resolve(&self, url: &str, request: &FetchRequest) -> Result<MediaInfo, DownloadError>;

    /// Download into `request.output_dir`, reporting through `on_event`
    async fn download(
        &self,
        url: &str,
        request: &FetchRequest,
        on_event: ProgressCallback,
    ) -> Result<MediaInfo, DownloadError>;
}

/// Writes progress for exactly one job into the store
#[derive(Clone)]
pub struct JobReporter {
    store: Arc<ProgressStore>,
    job_id: JobId,
}

impl JobReporter {
    pub fn new(store: Arc<ProgressStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Unknown ids are a no-op
    pub fn emit(&self, patch: JobPatch) {
        if let Err(e) = self.store.update(&self.job_id, patch) {
            debug!(job_id = %self.job_id, "progress dropped: {}", e);
        }
    }

    pub fn downloading(&self, downloaded: u64, total: Option<u64>, speed: Option<f64>) {
        let mut patch = JobPatch::new().status(JobStatus::Downloading);
        if let Some(total) = total {
            patch = patch.percent(percent_of(downloaded, total));
        }
        if let Some(speed) = speed {
            patch = patch.speed(format_speed(speed));
        }
        self.emit(patch);
    }

    pub fn handle_event(&self, event: FetchEvent) {
        match event {
            FetchEvent::Resolved { title, .. } if !title.is_empty() => {
                self.emit(JobPatch::new().title(title));
            }
            FetchEvent::Resolved { .. } => {}
            FetchEvent::Downloading {
                downloaded,
                total,
                speed,
            } => self.downloading(downloaded, total, speed),
            FetchEvent::Finished => {
                self.emit(JobPatch::new().status(JobStatus::Processing).percent(100));
            }
            FetchEvent::Error { message } => {
                // the adapter returns the failure itself; nothing to store here
                warn!(job_id = %self.job_id, "adapter reported error: {}", message);
            }
        }
    }

    pub fn callback(&self) -> ProgressCallback {
        let reporter = self.clone();
        Arc::new(move |event| reporter.handle_event(event))
    }
}
