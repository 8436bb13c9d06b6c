// YouTube Data API channel lookup (pass-through)

use std::time::Duration;
use tracing::{debug, warn};

use crate::downloader::errors::DownloadError;

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Clone)]
pub struct ChannelClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ChannelClient {
    pub fn new(api_key: Option<String>) -> Result<Self, DownloadError> {
        Self::with_base_url(api_key, YOUTUBE_API_BASE)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: impl Into<String>) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DownloadError::UpstreamError(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Channel snippet and statistics, upstream JSON returned unchanged
    pub async fn lookup(&self, channel_id: &str) -> Result<serde_json::Value, DownloadError> {
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Err(DownloadError::InvalidInput("Channel id is empty".to_string()));
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DownloadError::Unconfigured("YouTube API key not configured".to_string()))?;

        debug!(channel_id, "[channel] lookup");
        let response = self
            .client
            .get(format!("{}/channels", self.base_url))
            .query(&[
                ("part", "snippet,statistics"),
                ("id", channel_id),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(|e| {
                warn!(channel_id, "[channel] request failed: {}", e);
                DownloadError::UpstreamError(format!("Failed to fetch channel info: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(channel_id, %status, "[channel] upstream rejected lookup");
            return Err(DownloadError::UpstreamError(format!(
                "Failed to fetch channel info: HTTP {}",
                status
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| DownloadError::UpstreamError(format!("Invalid channel response: {}", e)))
    }
}
