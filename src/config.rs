// Runtime settings from the environment (and an optional `.env` file)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::downloader::models::FetchRequest;

pub const DEFAULT_FORMAT: &str = "best[ext=mp4]/best";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub youtube_api_key: Option<String>,
    /// yt-dlp binary; probed when unset
    pub ytdlp_path: Option<String>,
    /// Run yt-dlp as `<python> -m yt_dlp` instead of the binary
    pub ytdlp_python: Option<String>,
    pub proxy: Option<String>,
    pub allow_insecure_tls: bool,
    pub socket_timeout: Duration,
    pub retry_backoff: Duration,
    pub max_concurrent_jobs: Option<usize>,
    pub default_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            youtube_api_key: None,
            ytdlp_path: None,
            ytdlp_python: None,
            proxy: None,
            allow_insecure_tls: true,
            socket_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(2),
            max_concurrent_jobs: None,
            default_format: DEFAULT_FORMAT.to_string(),
        }
    }
}

impl Settings {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            download_dir: text("TUBEGRAB_DOWNLOAD_DIR")
                .map(|dir| expand_home(&dir))
                .unwrap_or(defaults.download_dir),
            youtube_api_key: text("YOUTUBE_API_KEY"),
            ytdlp_path: text("TUBEGRAB_YTDLP"),
            ytdlp_python: text("TUBEGRAB_YTDLP_PYTHON"),
            proxy: text("TUBEGRAB_PROXY"),
            allow_insecure_tls: parse_bool("TUBEGRAB_ALLOW_INSECURE_TLS", text("TUBEGRAB_ALLOW_INSECURE_TLS"))
                .unwrap_or(defaults.allow_insecure_tls),
            socket_timeout: parse_num::<u64>("TUBEGRAB_SOCKET_TIMEOUT_SECS", text("TUBEGRAB_SOCKET_TIMEOUT_SECS"))
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.socket_timeout),
            retry_backoff: parse_num::<u64>("TUBEGRAB_RETRY_BACKOFF_SECS", text("TUBEGRAB_RETRY_BACKOFF_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_backoff),
            max_concurrent_jobs: parse_num::<usize>(
                "TUBEGRAB_MAX_CONCURRENT_JOBS",
                text("TUBEGRAB_MAX_CONCURRENT_JOBS"),
            )
            .filter(|n| *n > 0),
            default_format: text("TUBEGRAB_DEFAULT_FORMAT").unwrap_or(defaults.default_format),
        }
    }

    /// Base request every job starts from
    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            format: Some(self.default_format.clone()),
            output_dir: self.download_dir.clone(),
            timeout: self.socket_timeout,
            proxy: self.proxy.clone(),
            ..FetchRequest::default()
        }
    }

    pub fn ensure_download_dir(&self) -> std::io::Result<&Path> {
        std::fs::create_dir_all(&self.download_dir)?;
        Ok(&self.download_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn parse_num<T: FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", key, value);
            None
        }
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Option<bool> {
    let value = value?;
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!("Ignoring {}={:?}: expected true/false", key, value);
            None
        }
    }
}
