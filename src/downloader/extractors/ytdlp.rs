// yt-dlp fetch adapter
//
// Info mode:     `--dump-json`, parsed into MediaInfo (direct stream URL included
//                when the selected format is a single progressive file)
// Download mode: machine-readable output lines
//   META {...}      before the transfer (id, title, ext)
//   PROGRESS {...}  yt-dlp progress dict (status, byte counts, speed)
//   RESULT {...}    after the file was moved into place

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::{Command as StdCommand, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{lossy_u64, FetchEvent, FetchRequest, MediaInfo, RawFormat};
use crate::downloader::traits::{MediaFetcher, ProgressCallback};
use crate::downloader::utils::run_output_with_timeout;

const PROGRESS_PREFIX: &str = "PROGRESS ";
const META_PREFIX: &str = "META ";
const RESULT_PREFIX: &str = "RESULT ";

/// Hung-process guard for managed downloads: maximum silence between output
/// lines, as a multiple of the socket timeout (merging can be quiet).
const IDLE_TIMEOUT_FACTOR: u32 = 10;

/// Fetch adapter driving the yt-dlp command line
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
    base_args: Vec<String>,
}

impl YtDlpFetcher {
    /// Native yt-dlp binary found on this machine
    pub fn new() -> Self {
        Self::with_command(Self::find_ytdlp(), Vec::new())
    }

    /// `python -m yt_dlp`
    pub fn python_module(python: impl Into<String>) -> Self {
        Self::with_command(python, vec!["-m".to_string(), "yt_dlp".to_string()])
    }

    /// Explicit program plus leading arguments
    pub fn with_command(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Find yt-dlp binary
    fn find_ytdlp() -> String {
        let common_paths = [
            "/opt/homebrew/bin/yt-dlp", // Homebrew on Apple Silicon
            "/usr/local/bin/yt-dlp",    // Homebrew on Intel Mac
            "/usr/bin/yt-dlp",          // System installation
        ];

        for path in common_paths {
            if std::path::Path::new(path).exists() {
                return path.to_string();
            }
        }

        if let Ok(output) = StdCommand::new("which").arg("yt-dlp").output() {
            if output.status.success() {
                if let Ok(path) = String::from_utf8(output.stdout) {
                    let trimmed = path.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                }
            }
        }

        "yt-dlp".to_string()
    }

    fn common_args(request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            request.timeout.as_secs().max(1).to_string(),
        ];

        if let Some(format) = &request.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }

        if !request.verify_certificates {
            args.push("--no-check-certificates".to_string());
        }

        if let Some(proxy) = &request.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args
    }

    pub(crate) fn build_info_args(&self, url: &str, request: &FetchRequest) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("--dump-json".to_string());
        args.extend(Self::common_args(request));
        args.push(url.to_string());
        args
    }

    pub(crate) fn build_download_args(&self, url: &str, request: &FetchRequest) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(Self::common_args(request));
        args.extend([
            "--newline".to_string(),
            "--progress".to_string(),
            "--no-simulate".to_string(),
            "--restrict-filenames".to_string(),
            "--progress-template".to_string(),
            format!("download:{}%(progress)j", PROGRESS_PREFIX),
            "--print".to_string(),
            format!("before_dl:{}%(.{{id,title,ext}})j", META_PREFIX),
            "--print".to_string(),
            format!("after_move:{}%(.{{id,title,ext,filepath}})j", RESULT_PREFIX),
            "-P".to_string(),
            request.output_dir.to_string_lossy().to_string(),
            "-o".to_string(),
            request.output_template.clone(),
        ]);
        args.push(url.to_string());
        args
    }

    /// Parse `--dump-json` output
    pub(crate) fn parse_info(stdout: &[u8]) -> Result<MediaInfo, DownloadError> {
        let json_str = String::from_utf8_lossy(stdout);
        let raw: DumpJson = serde_json::from_str(json_str.trim())
            .map_err(|e| DownloadError::transfer(format!("Invalid yt-dlp JSON: {}", e)))?;

        Ok(MediaInfo {
            id: raw.id,
            title: raw.title.unwrap_or_else(|| "video".to_string()),
            ext: raw.ext.unwrap_or_else(|| "mp4".to_string()),
            stream_url: raw.url.filter(|u| u.starts_with("http")),
            http_headers: raw.http_headers,
            filesize: raw.filesize.or(raw.filesize_approx),
            duration: raw.duration,
            formats: raw.formats,
        })
    }

    /// Map one output line of a managed download
    pub(crate) fn parse_line(line: &str) -> Option<OutputLine> {
        let line = line.trim();

        if let Some(json) = line.strip_prefix(PROGRESS_PREFIX) {
            let progress: ProgressLine = serde_json::from_str(json).ok()?;
            let event = match progress.status.as_str() {
                "downloading" => FetchEvent::Downloading {
                    downloaded: progress.downloaded_bytes.unwrap_or(0),
                    total: progress.total_bytes.or(progress.total_bytes_estimate),
                    speed: progress.speed,
                },
                "finished" => FetchEvent::Finished,
                "error" => FetchEvent::Error {
                    message: "yt-dlp reported a download error".to_string(),
                },
                _ => return None,
            };
            return Some(OutputLine::Event(event));
        }

        if let Some(json) = line.strip_prefix(META_PREFIX) {
            let meta: ResultLine = serde_json::from_str(json).ok()?;
            return Some(OutputLine::Event(FetchEvent::Resolved {
                id: meta.id,
                title: meta.title.unwrap_or_default(),
            }));
        }

        if let Some(json) = line.strip_prefix(RESULT_PREFIX) {
            let result: ResultLine = serde_json::from_str(json).ok()?;
            return Some(OutputLine::Result(MediaInfo {
                id: result.id,
                title: result.title.unwrap_or_else(|| "video".to_string()),
                ext: result.ext.unwrap_or_else(|| "mp4".to_string()),
                ..MediaInfo::default()
            }));
        }

        None
    }

    /// Short failure reason from stderr: `ERROR:` lines first, else the last line
    pub(crate) fn summarize_stderr(stderr: &str) -> Option<String> {
        let important: Vec<&str> = stderr
            .lines()
            .map(|l| l.trim())
            .filter(|l| l.starts_with("ERROR:"))
            .take(2)
            .collect();

        if !important.is_empty() {
            return Some(important.join(" | "));
        }

        stderr
            .lines()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty() && !l.starts_with(PROGRESS_PREFIX))
            .map(|l| l.to_string())
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Classified line of a managed download
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutputLine {
    Event(FetchEvent),
    Result(MediaInfo),
}

#[derive(Debug, Deserialize)]
struct DumpJson {
    id: String,
    title: Option<String>,
    ext: Option<String>,
    url: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
    #[serde(default, deserialize_with = "lossy_u64")]
    filesize: Option<u64>,
    #[serde(default, deserialize_with = "lossy_u64")]
    filesize_approx: Option<u64>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct ProgressLine {
    status: String,
    #[serde(default, deserialize_with = "lossy_u64")]
    downloaded_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lossy_u64")]
    total_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lossy_u64")]
    total_bytes_estimate: Option<u64>,
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    id: String,
    title: Option<String>,
    ext: Option<String>,
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &str, request: &FetchRequest) -> Result<MediaInfo, DownloadError> {
        let args = self.build_info_args(url, request);
        debug!("[yt-dlp] Running: {} {}", self.program, args.join(" "));

        let limit = request.timeout.as_secs().max(1) * 2;
        let output = run_output_with_timeout(&self.program, args, limit)
            .await
            .map_err(|e| DownloadError::transfer(format!("yt-dlp error: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = Self::summarize_stderr(&stderr)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(DownloadError::TransferFailure(reason));
        }

        Self::parse_info(&output.stdout)
    }

    async fn download(
        &self,
        url: &str,
        request: &FetchRequest,
        on_event: ProgressCallback,
    ) -> Result<MediaInfo, DownloadError> {
        let args = self.build_download_args(url, request);
        info!(
            verify_certificates = request.verify_certificates,
            "[yt-dlp] Starting managed download"
        );
        debug!("[yt-dlp] Running: {} {}", self.program, args.join(" "));

        let mut child = TokioCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::transfer(format!("Failed to start {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::transfer("Failed to capture yt-dlp stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::transfer("Failed to capture yt-dlp stderr"))?;

        // progress may be written to stderr when yt-dlp runs quiet
        let stderr_events = on_event.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                match Self::parse_line(&line) {
                    Some(OutputLine::Event(event)) => stderr_events(event),
                    _ => collected.push(line),
                }
            }
            collected.join("\n")
        });

        let idle = request.timeout.max(Duration::from_secs(1)) * IDLE_TIMEOUT_FACTOR;
        let mut lines = BufReader::new(stdout).lines();
        let mut result = None;

        loop {
            match timeout(idle, lines.next_line()).await {
                Ok(Ok(Some(line))) => match Self::parse_line(&line) {
                    Some(OutputLine::Event(event)) => on_event(event),
                    Some(OutputLine::Result(info)) => result = Some(info),
                    None => debug!("[yt-dlp] {}", line),
                },
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!("[yt-dlp] stdout read failed: {}", e);
                    break;
                }
                Err(_) => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    let message = format!("yt-dlp produced no output for {}s", idle.as_secs());
                    on_event(FetchEvent::Error {
                        message: message.clone(),
                    });
                    return Err(DownloadError::TransferFailure(message));
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::transfer(format!("Process error: {}", e)))?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        match result {
            Some(info) if status.success() => Ok(info),
            _ => {
                let message = Self::summarize_stderr(&stderr_output).unwrap_or_else(|| {
                    if status.success() {
                        "yt-dlp finished without reporting a file".to_string()
                    } else {
                        format!("yt-dlp exited with {}", status)
                    }
                });
                on_event(FetchEvent::Error {
                    message: message.clone(),
                });
                Err(DownloadError::TransferFailure(message))
            }
        }
    }
}
