pub mod channel;
pub mod config;
pub mod downloader;
pub mod logging;

pub use channel::ChannelClient;
pub use config::Settings;
pub use downloader::{DownloadError, JobDispatcher, JobId, JobSnapshot, JobStatus};
