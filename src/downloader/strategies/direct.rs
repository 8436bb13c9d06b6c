// Direct stream: resolve metadata without downloading, then pull the bytes
// ourselves so progress and retries are under our control.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::{AttemptContext, DownloadStrategy};
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{JobPatch, MediaInfo};
use crate::downloader::traits::JobReporter;
use crate::downloader::utils::expected_filename;

/// HTTP-level retries inside a single direct-stream attempt
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before retry n is `base_delay * 2^n`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }
}

/// Chunked HTTP download with manual progress accounting
#[derive(Debug, Clone)]
pub struct DirectTransfer {
    client: reqwest::Client,
    retry: RetryPolicy,
    chunk_timeout: Duration,
}

impl DirectTransfer {
    pub fn new(
        verify_certificates: bool,
        timeout: Duration,
        proxy: Option<&str>,
        retry: RetryPolicy,
    ) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_certificates)
            .connect_timeout(timeout);

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| DownloadError::transfer(format!("Invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::transfer(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            retry,
            chunk_timeout: timeout,
        })
    }

    fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
        headers
            .iter()
            .filter_map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
                let value = HeaderValue::from_str(value).ok()?;
                Some((name, value))
            })
            .collect()
    }

    async fn send(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::Response, DownloadError> {
        let headers = Self::header_map(headers);
        let mut retry = 0;

        loop {
            // connect_timeout does not cover a server that accepts and stays silent
            let sent = timeout(
                self.chunk_timeout,
                self.client.get(url).headers(headers.clone()).send(),
            )
            .await;
            let reason = match sent {
                Err(_) => format!(
                    "No response within {}s",
                    self.chunk_timeout.as_secs_f32()
                ),
                Ok(Ok(response)) if response.status().is_success() => return Ok(response),
                Ok(Ok(response)) => {
                    let status = response.status();
                    if !RetryPolicy::is_retryable_status(status) {
                        return Err(DownloadError::transfer(format!("HTTP {}", status)));
                    }
                    format!("HTTP {}", status)
                }
                Ok(Err(e)) if e.is_connect() || e.is_timeout() => format!("Connection error: {}", e),
                Ok(Err(e)) => return Err(DownloadError::transfer(format!("Request failed: {}", e))),
            };

            if retry >= self.retry.max_retries {
                return Err(DownloadError::transfer(format!(
                    "{} (after {} retries)",
                    reason, retry
                )));
            }

            let delay = self.retry.delay(retry);
            warn!("[direct] {}, retrying in {:?}", reason, delay);
            sleep(delay).await;
            retry += 1;
        }
    }

    /// Stream `url` into `dest`, reporting percent and speed per chunk.
    /// Returns the number of bytes written.
    pub async fn download_to(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        dest: &Path,
        reporter: &JobReporter,
    ) -> Result<u64, DownloadError> {
        let mut response = self.send(url, headers).await?;
        let total = response.content_length().filter(|t| *t > 0);
        let mut file = tokio::fs::File::create(dest).await?;

        let started = Instant::now();
        let mut downloaded: u64 = 0;

        loop {
            let chunk = timeout(self.chunk_timeout, response.chunk())
                .await
                .map_err(|_| {
                    DownloadError::transfer(format!(
                        "Read timed out after {}s",
                        self.chunk_timeout.as_secs()
                    ))
                })?
                .map_err(|e| DownloadError::transfer(format!("Stream error: {}", e)))?;

            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let elapsed = started.elapsed().as_secs_f64();
            let speed = (elapsed > 0.0).then(|| downloaded as f64 / elapsed);
            reporter.downloading(downloaded, total, speed);
        }

        file.flush().await?;

        if let Some(total) = total {
            if downloaded < total {
                return Err(DownloadError::transfer(format!(
                    "Connection closed after {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        Ok(downloaded)
    }
}

/// Strategy A
#[derive(Debug, Clone, Copy)]
pub struct DirectStreamStrategy {
    verify: bool,
    retry: RetryPolicy,
}

impl DirectStreamStrategy {
    pub fn new(verify_certificates: bool, retry: RetryPolicy) -> Self {
        Self {
            verify: verify_certificates,
            retry,
        }
    }
}

#[async_trait]
impl DownloadStrategy for DirectStreamStrategy {
    fn name(&self) -> &'static str {
        "direct-stream"
    }

    fn verify_certificates(&self) -> bool {
        self.verify
    }

    async fn attempt(&self, url: &str, ctx: &AttemptContext) -> Result<MediaInfo, DownloadError> {
        let request = ctx.request(self.verify);
        let info = ctx.fetcher.resolve(url, &request).await?;

        if !info.title.is_empty() {
            ctx.reporter.emit(JobPatch::new().title(info.title.clone()));
        }

        let stream_url = info.stream_url.clone().ok_or_else(|| {
            DownloadError::transfer("No direct stream available for the selected format")
        })?;

        let dest = request
            .output_dir
            .join(expected_filename(&info.title, &info.id, &info.ext));
        info!(job_id = %ctx.reporter.job_id(), dest = %dest.display(), "[direct] streaming");

        let transfer = DirectTransfer::new(
            self.verify,
            request.timeout,
            request.proxy.as_deref(),
            self.retry,
        )?;

        match transfer
            .download_to(&stream_url, &info.http_headers, &dest, &ctx.reporter)
            .await
        {
            Ok(bytes) => {
                debug!(job_id = %ctx.reporter.job_id(), bytes, "[direct] transfer complete");
                Ok(info)
            }
            Err(e) => {
                // partial file must not be picked up by artifact resolution
                let _ = tokio::fs::remove_file(&dest).await;
                Err(e)
            }
        }
    }
}
