// Downloader module - jobs, strategies and the yt-dlp adapter

pub mod dispatcher;
pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod strategies;
pub mod traits;
pub mod utils;

pub use dispatcher::JobDispatcher;
pub use errors::{DownloadError, ErrorPayload};
pub use extractors::YtDlpFetcher;
pub use format_selector::FormatSelector;
pub use models::{Artifact, FormatEntry, Job, JobId, JobSnapshot, JobStatus, MediaInfo};
pub use orchestrator::Orchestrator;
pub use store::ProgressStore;
pub use strategies::{DownloadStrategy, StrategyPolicy};
pub use traits::{JobReporter, MediaFetcher};
