// Orchestrator with fallback logic
//
// Runs one job to a terminal state: each strategy of the policy gets one
// attempt. A failed attempt leaves the job in `trying` (percent 0) for a
// fixed backoff. The first success wins; after the last failure and its
// backoff the job ends in `error` with that failure's message.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::errors::DownloadError;
use super::models::{Artifact, FetchRequest, JobPatch, JobStatus};
use super::strategies::{AttemptContext, DownloadStrategy, StrategyPolicy};
use super::traits::{JobReporter, MediaFetcher};
use super::utils::{display_filename, resolve_artifact};

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

pub struct Orchestrator {
    fetcher: Arc<dyn MediaFetcher>,
    policy: StrategyPolicy,
    request: FetchRequest,
    backoff: Duration,
}

impl Orchestrator {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, policy: StrategyPolicy, request: FetchRequest) -> Self {
        Self {
            fetcher,
            policy,
            request,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn MediaFetcher> {
        &self.fetcher
    }

    pub fn policy(&self) -> &StrategyPolicy {
        &self.policy
    }

    /// Base request: output directory, default format, timeout, proxy
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// Drive the job to `completed` or `error`. The outcome is written to the
    /// store through `reporter` and also returned for the caller's logs.
    pub async fn run(
        &self,
        url: &str,
        format: Option<String>,
        reporter: JobReporter,
    ) -> Result<Artifact, DownloadError> {
        let mut request = self.request.clone();
        if format.is_some() {
            request.format = format;
        }
        let ctx = AttemptContext {
            fetcher: Arc::clone(&self.fetcher),
            reporter: reporter.clone(),
            request,
        };

        let total = self.policy.len();
        let mut last_error = DownloadError::transfer("No download strategies configured");

        for (index, strategy) in self.policy.strategies().iter().enumerate() {
            let attempt = index + 1;
            info!(
                job_id = %reporter.job_id(),
                strategy = strategy.name(),
                verify_certificates = strategy.verify_certificates(),
                "[Orchestrator] Attempt {}/{}",
                attempt,
                total
            );

            match self.attempt(strategy.as_ref(), url, &ctx).await {
                Ok(artifact) => {
                    info!(
                        job_id = %reporter.job_id(),
                        strategy = strategy.name(),
                        path = %artifact.path.display(),
                        "[Orchestrator] ✓ Download complete"
                    );
                    reporter.emit(JobPatch::completed(&artifact));
                    return Ok(artifact);
                }
                Err(e) => {
                    warn!(
                        job_id = %reporter.job_id(),
                        strategy = strategy.name(),
                        "[Orchestrator] ✗ Attempt {}/{} failed: {}",
                        attempt,
                        total,
                        e
                    );
                    // pollers see the retry view for the whole backoff
                    reporter.emit(
                        JobPatch::new()
                            .status(JobStatus::Trying)
                            .percent(0)
                            .title(format!("Attempt {}/{}...", attempt, total)),
                    );
                    last_error = e;
                }
            }

            if !self.backoff.is_zero() {
                sleep(self.backoff).await;
            }
        }

        warn!(job_id = %reporter.job_id(), "[Orchestrator] All strategies failed: {}", last_error);
        reporter.emit(JobPatch::failed(last_error.to_string()));
        Err(last_error)
    }

    /// One strategy attempt plus locating the produced file
    async fn attempt(
        &self,
        strategy: &dyn DownloadStrategy,
        url: &str,
        ctx: &AttemptContext,
    ) -> Result<Artifact, DownloadError> {
        let info = strategy.attempt(url, ctx).await?;
        let path = resolve_artifact(&ctx.request.output_dir, &info.title, &info.id, &info.ext).await?;

        if !info.title.is_empty() {
            ctx.reporter.emit(JobPatch::new().title(info.title.clone()));
        }

        Ok(Artifact {
            path,
            filename: display_filename(&info.title, &info.ext),
        })
    }
}
