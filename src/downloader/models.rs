// Common data models for download jobs

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Opaque job identifier, generated at submission and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Trying,
    Downloading,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Trying => "trying",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// States that begin a fresh attempt and reset `percent`
    fn resets_progress(&self) -> bool {
        matches!(self, Self::Starting | Self::Trying)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub status: JobStatus,
    pub percent: u8,
    pub speed: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn starting(title: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Starting,
            percent: 0,
            speed: String::new(),
            title: title.into(),
            filepath: None,
            filename: None,
            error: None,
        }
    }

    /// Merge a patch into the record. Returns false when the record is
    /// terminal and the patch was dropped.
    pub fn apply(&mut self, patch: JobPatch) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        let resets = patch.status.map_or(false, |s| s.resets_progress());
        if let Some(status) = patch.status {
            self.status = status;
        }

        if resets {
            self.percent = patch.percent.unwrap_or(0).min(100);
            self.speed.clear();
        } else if let Some(percent) = patch.percent {
            // monotonic within an attempt
            self.percent = self.percent.max(percent.min(100));
        }

        if let Some(speed) = patch.speed {
            self.speed = speed;
        }
        if let Some(title) = patch.title {
            self.title = title;
        }

        match self.status {
            JobStatus::Completed => {
                self.filepath = patch.filepath;
                self.filename = patch.filename;
            }
            JobStatus::Error => {
                self.error = patch.error;
            }
            _ => {}
        }

        true
    }
}

/// Partial update merged atomically into a [`Job`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub percent: Option<u8>,
    pub speed: Option<String>,
    pub title: Option<String>,
    pub filepath: Option<PathBuf>,
    pub filename: Option<String>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn speed(mut self, speed: impl Into<String>) -> Self {
        self.speed = Some(speed.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn completed(artifact: &Artifact) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            percent: Some(100),
            filepath: Some(artifact.path.clone()),
            filename: Some(artifact.filename.clone()),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Job state as returned to pollers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    #[serde(flatten)]
    pub job: Job,
    /// Retrieval reference, present only once the job completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
}

impl JobSnapshot {
    pub fn new(id: JobId, job: Job) -> Self {
        let download = (job.status == JobStatus::Completed).then(|| format!("/download/{}", id));
        Self { id, job, download }
    }
}

/// Produced media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    /// Display name offered to the user (`{title}.{ext}`)
    pub filename: String,
}

impl Artifact {
    pub async fn open(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path).await
    }
}

/// Format entry as reported by the extraction engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    #[serde(deserialize_with = "lossy_u64")]
    pub filesize: Option<u64>,
    #[serde(deserialize_with = "lossy_u64")]
    pub filesize_approx: Option<u64>,
    /// Total bitrate in kbps
    pub tbr: Option<f64>,
}

impl RawFormat {
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref().map_or(true, |v| v != "none") && self.height.is_some()
    }
}

/// Byte counts from the extraction engine are sometimes floats or null
pub(crate) fn lossy_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value.and_then(|n| n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))))
}

/// Metadata resolved for a URL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    /// Container extension (mp4, webm, ...)
    pub ext: String,
    /// Direct byte-stream URL of the selected format, when one exists
    pub stream_url: Option<String>,
    pub http_headers: HashMap<String, String>,
    pub filesize: Option<u64>,
    pub duration: Option<f64>,
    pub formats: Vec<RawFormat>,
}

/// Entry of the format listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatEntry {
    pub format_id: String,
    pub resolution: String,
    pub height: u32,
    pub container: String,
    pub approx_size: String,
}

/// Event reported by the fetch adapter during a managed download
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// Metadata known before the transfer starts
    Resolved { id: String, title: String },
    Downloading {
        downloaded: u64,
        total: Option<u64>,
        /// Bytes per second
        speed: Option<f64>,
    },
    /// Transfer done; post-processing may follow
    Finished,
    Error { message: String },
}

/// Per-call parameters handed to the fetch adapter
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub format: Option<String>,
    pub output_dir: PathBuf,
    /// yt-dlp output template, relative to `output_dir`
    pub output_template: String,
    pub verify_certificates: bool,
    pub timeout: Duration,
    pub proxy: Option<String>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            format: None,
            output_dir: PathBuf::from("downloads"),
            output_template: "%(title)s_%(id)s.%(ext)s".to_string(),
            verify_certificates: true,
            timeout: Duration::from_secs(30),
            proxy: None,
        }
    }
}
