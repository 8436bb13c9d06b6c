// Job dispatcher - the boundary every caller goes through
//
// submit() validates, seeds the store and spawns one task per job; the
// read side (progress, artifact, formats) never blocks on a running job.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info};

use super::errors::DownloadError;
use super::extractors::YtDlpFetcher;
use super::format_selector::FormatSelector;
use super::models::{Artifact, FormatEntry, Job, JobId, JobSnapshot, JobStatus};
use super::orchestrator::Orchestrator;
use super::store::ProgressStore;
use super::strategies::{RetryPolicy, StrategyPolicy};
use super::traits::{JobReporter, MediaFetcher};
use super::utils::{extract_video_id, validate_url};
use crate::config::Settings;

/// Title shown until the first attempt starts
pub const PLACEHOLDER_TITLE: &str = "Preparing download...";

#[derive(Clone)]
pub struct JobDispatcher {
    store: Arc<ProgressStore>,
    orchestrator: Arc<Orchestrator>,
    limiter: Option<Arc<Semaphore>>,
}

impl JobDispatcher {
    pub fn new(store: Arc<ProgressStore>, orchestrator: Orchestrator) -> Self {
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            limiter: None,
        }
    }

    /// Jobs beyond `max` running at once wait in `starting`
    pub fn with_concurrency_limit(mut self, max: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let fetcher: Arc<dyn MediaFetcher> = match (&settings.ytdlp_python, &settings.ytdlp_path) {
            (Some(python), _) => Arc::new(YtDlpFetcher::python_module(python.clone())),
            (None, Some(path)) => Arc::new(YtDlpFetcher::with_command(path.clone(), Vec::new())),
            (None, None) => Arc::new(YtDlpFetcher::new()),
        };
        let policy = StrategyPolicy::standard(settings.allow_insecure_tls, RetryPolicy::default());
        let orchestrator = Orchestrator::new(fetcher, policy, settings.fetch_request())
            .with_backoff(settings.retry_backoff);

        let dispatcher = Self::new(Arc::new(ProgressStore::new()), orchestrator);
        match settings.max_concurrent_jobs {
            Some(max) => dispatcher.with_concurrency_limit(max),
            None => dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Validate, create the job and start it in the background.
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, url: &str, format: Option<&str>) -> Result<JobId, DownloadError> {
        let url = validate_url(url)?.to_string();
        let format = format
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(FormatSelector::format_spec);

        let job_id = JobId::new();
        self.store.create(job_id, Job::starting(PLACEHOLDER_TITLE));
        info!(
            %job_id,
            video_id = extract_video_id(&url).unwrap_or("unknown"),
            "Attempting to download video"
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let limiter = self.limiter.clone();
        let reporter = JobReporter::new(Arc::clone(&self.store), job_id);

        tokio::spawn(async move {
            let _permit = match limiter {
                Some(limiter) => match limiter.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        error!(%job_id, "job limiter closed");
                        return;
                    }
                },
                None => None,
            };

            if let Err(e) = orchestrator.run(&url, format, reporter).await {
                error!(%job_id, "Download failed: {}", e);
            }
        });

        Ok(job_id)
    }

    pub fn query_progress(&self, id: &str) -> Result<JobSnapshot, DownloadError> {
        let job_id = Self::parse_id(id)?;
        let job = self.store.get(&job_id)?;
        Ok(JobSnapshot::new(job_id, job))
    }

    /// The completed job's file, checked to still exist on disk
    pub async fn retrieve_artifact(&self, id: &str) -> Result<Artifact, DownloadError> {
        let job_id = Self::parse_id(id)?;
        let job = self.store.get(&job_id)?;

        if job.status != JobStatus::Completed {
            return Err(DownloadError::NotReady {
                status: job.status.as_str().to_string(),
            });
        }

        let path = job.filepath.unwrap_or_default();
        let exists = tokio::fs::metadata(&path).await.map_or(false, |m| m.is_file());
        if !exists {
            return Err(DownloadError::MissingArtifact(path));
        }

        let filename = job.filename.unwrap_or_else(|| file_name_of(&path));
        Ok(Artifact { path, filename })
    }

    /// Read-only listing of the formats available for `url`
    pub async fn list_formats(&self, url: &str) -> Result<Vec<FormatEntry>, DownloadError> {
        let url = validate_url(url)?;
        let mut request = self.orchestrator.request().clone();
        request.format = None;
        request.verify_certificates = self
            .orchestrator
            .policy()
            .strategies()
            .first()
            .map_or(true, |s| s.verify_certificates());

        let info = self
            .orchestrator
            .fetcher()
            .resolve(url, &request)
            .await
            .map_err(|e| match e {
                DownloadError::TransferFailure(msg) => DownloadError::UpstreamError(msg),
                other => other,
            })?;

        Ok(FormatSelector::list_formats(&info))
    }

    /// Poll until the job is terminal
    pub async fn wait_for(&self, id: JobId, interval: Duration) -> Result<JobSnapshot, DownloadError> {
        loop {
            let job = self.store.get(&id)?;
            if job.status.is_terminal() {
                return Ok(JobSnapshot::new(id, job));
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn parse_id(id: &str) -> Result<JobId, DownloadError> {
        id.parse()
            .map_err(|_| DownloadError::NotFound(id.trim().to_string()))
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{FetchEvent, FetchRequest, MediaInfo, RawFormat};
    use crate::downloader::traits::ProgressCallback;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::io::AsyncReadExt;
    use tokio::sync::Notify;

    /// Adapter with no direct stream: every job goes through the managed
    /// strategies. `fail_all` makes every call fail.
    struct FakeFetcher {
        gate: Option<Arc<Notify>>,
        fail_all: bool,
    }

    #[async_trait]
    impl MediaFetcher for FakeFetcher {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn resolve(&self, url: &str, _request: &FetchRequest) -> Result<MediaInfo, DownloadError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_all {
                return Err(DownloadError::transfer("resolve failed"));
            }
            Ok(MediaInfo {
                id: extract_video_id(url).unwrap_or("x").to_string(),
                title: "Clip".to_string(),
                ext: "mp4".to_string(),
                formats: vec![
                    RawFormat {
                        format_id: "18".to_string(),
                        ext: "mp4".to_string(),
                        height: Some(360),
                        ..RawFormat::default()
                    },
                    RawFormat {
                        format_id: "22".to_string(),
                        ext: "mp4".to_string(),
                        height: Some(720),
                        ..RawFormat::default()
                    },
                ],
                ..MediaInfo::default()
            })
        }

        async fn download(
            &self,
            url: &str,
            request: &FetchRequest,
            on_event: ProgressCallback,
        ) -> Result<MediaInfo, DownloadError> {
            if self.fail_all {
                return Err(DownloadError::transfer(format!(
                    "download failed (verify={})",
                    request.verify_certificates
                )));
            }
            let id = extract_video_id(url).unwrap_or("x").to_string();
            on_event(FetchEvent::Resolved {
                id: id.clone(),
                title: format!("Clip {}", id),
            });
            on_event(FetchEvent::Downloading {
                downloaded: 10,
                total: Some(10),
                speed: None,
            });
            let name = format!("Clip {}_{}.mp4", id, id);
            tokio::fs::write(request.output_dir.join(name), id.as_bytes()).await?;
            Ok(MediaInfo {
                id: id.clone(),
                title: format!("Clip {}", id),
                ext: "mp4".to_string(),
                ..MediaInfo::default()
            })
        }
    }

    fn dispatcher(fetcher: FakeFetcher, dir: &std::path::Path) -> JobDispatcher {
        let request = FetchRequest {
            output_dir: dir.to_path_buf(),
            ..FetchRequest::default()
        };
        let policy = StrategyPolicy::standard(
            true,
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::ZERO,
            },
        );
        let orchestrator =
            Orchestrator::new(Arc::new(fetcher), policy, request).with_backoff(Duration::ZERO);
        JobDispatcher::new(Arc::new(ProgressStore::new()), orchestrator)
    }

    async fn wait(d: &JobDispatcher, id: JobId) -> JobSnapshot {
        tokio::time::timeout(Duration::from_secs(10), d.wait_for(id, Duration::from_millis(5)))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn invalid_url_creates_no_job() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeFetcher { gate: None, fail_all: false }, tmp.path());

        let err = d.submit("not-a-url", None).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidInput(_)));
        assert!(d.store().is_empty());
    }

    #[tokio::test]
    async fn submit_then_poll_until_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let d = dispatcher(
            FakeFetcher {
                gate: Some(Arc::clone(&gate)),
                fail_all: false,
            },
            tmp.path(),
        );

        let id = d.submit("https://youtu.be/abc123", None).unwrap();
        let first = d.query_progress(&id.to_string()).unwrap();
        assert_eq!(first.job.status, JobStatus::Starting);
        assert_eq!(first.job.percent, 0);
        assert_eq!(first.job.title, "Preparing download...");
        assert!(first.download.is_none());

        // first attempt is still in flight, so nothing is retrying yet
        let err = d.retrieve_artifact(&id.to_string()).await.unwrap_err();
        assert!(matches!(err, DownloadError::NotReady { ref status, .. } if status == "starting"));

        gate.notify_one();
        let done = wait(&d, id).await;
        assert_eq!(done.job.status, JobStatus::Completed);
        assert_eq!(done.job.percent, 100);
        assert_eq!(done.download, Some(format!("/download/{}", id)));

        let artifact = d.retrieve_artifact(&id.to_string()).await.unwrap();
        assert_eq!(artifact.filename, "Clip abc123.mp4");
        let mut contents = String::new();
        artifact.open().await.unwrap().read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents, "abc123");

        // terminal snapshots are stable
        assert_eq!(d.query_progress(&id.to_string()).unwrap(), done);
        assert_eq!(d.query_progress(&id.to_string()).unwrap(), done);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeFetcher { gate: None, fail_all: false }, tmp.path());

        let unknown = JobId::new().to_string();
        assert!(matches!(d.query_progress(&unknown), Err(DownloadError::NotFound(_))));
        assert!(matches!(d.query_progress("garbage"), Err(DownloadError::NotFound(_))));
        assert!(matches!(
            d.retrieve_artifact(&unknown).await,
            Err(DownloadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleted_file_is_missing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeFetcher { gate: None, fail_all: false }, tmp.path());

        let id = d.submit("https://www.youtube.com/watch?v=gone1", None).unwrap();
        let done = wait(&d, id).await;
        let path = done.job.filepath.clone().unwrap();
        std::fs::remove_file(&path).unwrap();

        let err = d.retrieve_artifact(&id.to_string()).await.unwrap_err();
        assert_eq!(err, DownloadError::MissingArtifact(path));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn exhausted_job_reports_last_strategy_error() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeFetcher { gate: None, fail_all: true }, tmp.path());

        let id = d.submit("https://youtu.be/abc123", Some("720p")).unwrap();
        let done = wait(&d, id).await;
        assert_eq!(done.job.status, JobStatus::Error);
        assert_eq!(done.job.error.as_deref(), Some("download failed (verify=true)"));
        assert!(done.download.is_none());

        let err = d.retrieve_artifact(&id.to_string()).await.unwrap_err();
        assert_eq!(err, DownloadError::NotReady { status: "error".to_string() });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_stay_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeFetcher { gate: None, fail_all: false }, tmp.path())
            .with_concurrency_limit(16);

        let mut handles = Vec::new();
        for n in 0..100 {
            let d = d.clone();
            handles.push(tokio::spawn(async move {
                let video = format!("vid{:03}", n);
                let id = d.submit(&format!("https://youtu.be/{}", video), None).unwrap();
                (id, video)
            }));
        }

        let mut submitted = Vec::new();
        for handle in handles {
            submitted.push(handle.await.unwrap());
        }
        let ids: HashSet<JobId> = submitted.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 100);

        for (id, video) in submitted {
            let done = wait(&d, id).await;
            assert_eq!(done.job.status, JobStatus::Completed);
            assert_eq!(done.job.title, format!("Clip {}", video));
            let path = done.job.filepath.unwrap();
            assert_eq!(std::fs::read_to_string(path).unwrap(), video);
        }
    }

    #[tokio::test]
    async fn lists_formats_highest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeFetcher { gate: None, fail_all: false }, tmp.path());

        let formats = d.list_formats("https://youtu.be/abc123").await.unwrap();
        let heights: Vec<u32> = formats.iter().map(|f| f.height).collect();
        assert_eq!(heights, vec![720, 360]);

        assert!(matches!(
            d.list_formats("https://vimeo.com/1").await,
            Err(DownloadError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn format_resolution_failure_is_upstream_error() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(FakeFetcher { gate: None, fail_all: true }, tmp.path());
        let err = d.list_formats("https://youtu.be/abc123").await.unwrap_err();
        assert_eq!(err, DownloadError::UpstreamError("resolve failed".to_string()));
    }
}
