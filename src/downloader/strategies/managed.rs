use async_trait::async_trait;
use tracing::debug;

use super::{AttemptContext, DownloadStrategy};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::MediaInfo;

/// The fetch adapter downloads on its own; progress flows back through
/// the job reporter's callback.
#[derive(Debug, Clone, Copy)]
pub struct AdapterStrategy {
    verify: bool,
}

impl AdapterStrategy {
    pub fn new(verify_certificates: bool) -> Self {
        Self {
            verify: verify_certificates,
        }
    }
}

#[async_trait]
impl DownloadStrategy for AdapterStrategy {
    fn name(&self) -> &'static str {
        if self.verify {
            "managed-verified"
        } else {
            "managed"
        }
    }

    fn verify_certificates(&self) -> bool {
        self.verify
    }

    async fn attempt(&self, url: &str, ctx: &AttemptContext) -> Result<MediaInfo, DownloadError> {
        let request = ctx.request(self.verify);
        debug!(
            job_id = %ctx.reporter.job_id(),
            adapter = ctx.fetcher.name(),
            "handing download to adapter"
        );
        ctx.fetcher
            .download(url, &request, ctx.reporter.callback())
            .await
    }
}
