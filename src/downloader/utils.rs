// Helper functions shared by the adapter, strategies and dispatcher

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration};

use super::errors::DownloadError;

/// Host markers of the supported video platform
pub const HOST_MARKERS: &[&str] = &["youtube.com", "youtu.be"];

lazy_static::lazy_static! {
    static ref UNSAFE_CHARS_RE: Regex = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
    static ref VIDEO_ID_RE: Regex =
        Regex::new(r"(?:[?&]v=|youtu\.be/|/shorts/)([A-Za-z0-9_-]+)").unwrap();
}

/// Syntactic check: the URL names a known platform host
pub fn is_supported_url(url: &str) -> bool {
    let lower = url.trim().to_lowercase();
    !lower.is_empty() && HOST_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn validate_url(url: &str) -> Result<&str, DownloadError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::InvalidInput(
            "Please enter a YouTube URL".to_string(),
        ));
    }
    if !is_supported_url(trimmed) {
        return Err(DownloadError::InvalidInput(format!(
            "Invalid YouTube URL: {}",
            trimmed
        )));
    }
    Ok(trimmed)
}

/// Platform video id from a watch or short link, for logging
pub fn extract_video_id(url: &str) -> Option<&str> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Remove characters that are invalid in file names
pub fn sanitize_filename(name: &str) -> String {
    UNSAFE_CHARS_RE.replace_all(name, "").trim().to_string()
}

/// Deterministic output name: `{sanitized title}_{id}.{ext}`
pub fn expected_filename(title: &str, id: &str, ext: &str) -> String {
    format!("{}_{}.{}", sanitize_filename(title), id, ext)
}

/// Name offered to the user when the file is retrieved
pub fn display_filename(title: &str, ext: &str) -> String {
    let title = sanitize_filename(title);
    let title = if title.is_empty() { "video".to_string() } else { title };
    format!("{}.{}", title, ext)
}

/// Locate the produced file: the expected path first, then any file in
/// `dir` whose name contains `id` and ends with `.{ext}`.
pub async fn resolve_artifact(
    dir: &Path,
    title: &str,
    id: &str,
    ext: &str,
) -> Result<PathBuf, DownloadError> {
    let not_found = || DownloadError::ArtifactNotFound {
        id: id.to_string(),
        ext: ext.to_string(),
    };
    if id.is_empty() {
        return Err(not_found());
    }

    let expected = dir.join(expected_filename(title, id, ext));
    if tokio::fs::metadata(&expected).await.map_or(false, |m| m.is_file()) {
        return Ok(expected);
    }

    let suffix = format!(".{}", ext);
    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|_| not_found())?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.contains(id) && name.ends_with(&suffix) {
            if entry.file_type().await.map_or(false, |t| t.is_file()) {
                candidates.push(entry.path());
            }
        }
    }
    candidates.sort();
    candidates.into_iter().next().ok_or_else(not_found)
}

/// floor(downloaded / total * 100), clamped to 0..=100
pub fn percent_of(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (downloaded as u128 * 100) / total as u128;
    pct.min(100) as u8
}

/// Human-readable transfer rate
pub fn format_speed(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_sec.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format file size for display
pub fn format_size(bytes: u64) -> String {
    let mb = bytes as f64 / 1_048_576.0;
    if mb >= 1024.0 {
        format!("{:.1} GB", mb / 1024.0)
    } else if mb >= 1.0 {
        format!("{:.0} MB", mb)
    } else {
        format!("{:.0} KB", (bytes as f64 / 1024.0).max(1.0))
    }
}

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, String> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| format!("Failed to capture stdout from {}", program))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| format!("Failed to capture stderr from {}", program))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stdout: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stderr: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });

    let waited = timeout(Duration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res.map_err(|e| format!("Failed to wait for {}: {}", program, e))?;
            let stdout = stdout_task
                .await
                .map_err(|e| format!("stdout task failed: {}", e))??;
            let stderr = stderr_task
                .await
                .map_err(|e| format!("stderr task failed: {}", e))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(format!("Timed out after {}s", timeout_secs))
        }
    }
}
