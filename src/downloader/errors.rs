// Error types for download jobs and their collaborators

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    /// Missing or unrecognized video URL, bad channel id
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Job id was never issued by this process
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Artifact requested before the job completed
    #[error("Download not ready (status: {status})")]
    NotReady { status: String },

    /// Job completed but its file is gone from disk
    #[error("Downloaded file is missing: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Post-download filename resolution found nothing for the media id
    #[error("No downloaded file found for id '{id}' with extension '.{ext}'")]
    ArtifactNotFound { id: String, ext: String },

    /// External credential is not configured
    #[error("Not configured: {0}")]
    Unconfigured(String),

    /// Third-party API or network failure outside a download attempt
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// A single strategy attempt failed; feeds the retry loop.
    /// The message is kept verbatim because an exhausted job exposes it.
    #[error("{0}")]
    TransferFailure(String),
}

impl DownloadError {
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferFailure(msg.into())
    }

    /// Stable tag used in structured error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::NotReady { .. } => "not_ready",
            Self::MissingArtifact(_) => "missing_artifact",
            Self::ArtifactNotFound { .. } => "artifact_not_found",
            Self::Unconfigured(_) => "unconfigured",
            Self::UpstreamError(_) => "upstream_error",
            Self::TransferFailure(_) => "transfer_failure",
        }
    }

    /// Whether the caller caused the failure (4xx-style)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::NotFound(_)
                | Self::NotReady { .. }
                | Self::MissingArtifact(_)
        )
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.to_string(),
            kind: self.kind(),
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::TransferFailure(format!("I/O error: {}", err))
    }
}

/// Structured error body surfaced at the boundary
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: String,
    pub kind: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_failure_displays_message_verbatim() {
        let err = DownloadError::transfer("ERROR: HTTP Error 403: Forbidden");
        assert_eq!(err.to_string(), "ERROR: HTTP Error 403: Forbidden");
        assert!(!err.is_client_error());
    }

    #[test]
    fn payload_carries_kind_tag() {
        let err = DownloadError::NotReady {
            status: "downloading".to_string(),
        };
        let payload = err.payload();
        assert_eq!(payload.kind, "not_ready");
        assert!(payload.error.contains("downloading"));
        assert!(err.is_client_error());

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "not_ready");
    }

    #[test]
    fn io_errors_become_transfer_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: DownloadError = io.into();
        assert_eq!(err.kind(), "transfer_failure");
    }
}
