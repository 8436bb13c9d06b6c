//! tubegrab CLI - download jobs with progress and strategy fallback.
//!
//! Usage:
//!   tubegrab get <url> [--format F]
//!   tubegrab formats <url>
//!   tubegrab channel <id>

use clap::{Parser, Subcommand};
use std::time::Duration;
use tubegrab::downloader::{DownloadError, JobDispatcher, JobStatus};
use tubegrab::{logging, ChannelClient, Settings};

#[derive(Parser)]
#[command(
    name = "tubegrab",
    version,
    about = "Download videos with progress tracking and strategy fallback"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a video and print the path of the saved file
    Get {
        /// Video URL
        url: String,
        /// Quality label (best, 1080p, 720p, 480p, 360p, audio) or yt-dlp format selector
        #[arg(long, short)]
        format: Option<String>,
    },
    /// List available video formats, highest resolution first
    Formats {
        /// Video URL
        url: String,
    },
    /// Show channel snippet and statistics as JSON
    Channel {
        /// Channel id (UC...)
        id: String,
    },
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Print the structured error payload; exit code 2 for caller errors
fn report(err: &DownloadError) -> i32 {
    match serde_json::to_string(&err.payload()) {
        Ok(json) => eprintln!("{}", json),
        Err(_) => eprintln!("Error: {}", err),
    }
    if err.is_client_error() {
        2
    } else {
        1
    }
}

async fn cmd_get(dispatcher: &JobDispatcher, url: &str, format: Option<&str>) -> i32 {
    let id = match dispatcher.submit(url, format) {
        Ok(id) => id,
        Err(e) => return report(&e),
    };
    let id_str = id.to_string();

    let mut last_line = String::new();
    loop {
        let snapshot = match dispatcher.query_progress(&id_str) {
            Ok(s) => s,
            Err(e) => return report(&e),
        };
        let job = &snapshot.job;

        let line = format!("[{}] {:>3}% {} {}", job.status, job.percent, job.speed, job.title);
        if line != last_line {
            eprintln!("{}", line.trim_end());
            last_line = line;
        }

        match job.status {
            JobStatus::Completed => break,
            JobStatus::Error => {
                let message = job.error.clone().unwrap_or_else(|| "download failed".to_string());
                return report(&DownloadError::TransferFailure(message));
            }
            _ => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }

    match dispatcher.retrieve_artifact(&id_str).await {
        Ok(artifact) => {
            println!("{}", artifact.path.display());
            0
        }
        Err(e) => report(&e),
    }
}

async fn cmd_formats(dispatcher: &JobDispatcher, url: &str) -> i32 {
    let formats = match dispatcher.list_formats(url).await {
        Ok(f) => f,
        Err(e) => return report(&e),
    };
    if formats.is_empty() {
        println!("No video formats found.");
        return 0;
    }
    println!("{:<10}  {:<10}  {:<9}  {:>10}", "ID", "RESOLUTION", "CONTAINER", "SIZE");
    println!("{}", "-".repeat(45));
    for f in formats {
        println!(
            "{:<10}  {:<10}  {:<9}  {:>10}",
            f.format_id, f.resolution, f.container, f.approx_size
        );
    }
    0
}

async fn cmd_channel(settings: &Settings, id: &str) -> i32 {
    let result = match ChannelClient::new(settings.youtube_api_key.clone()) {
        Ok(client) => client.lookup(id).await,
        Err(e) => Err(e),
    };
    match result.and_then(|value| {
        serde_json::to_string_pretty(&value)
            .map_err(|e| DownloadError::UpstreamError(e.to_string()))
    }) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => report(&e),
    }
}

#[tokio::main]
async fn main() {
    logging::init_tracing();
    let cli = Cli::parse();
    let settings = Settings::from_env();

    let code = match cli.command {
        Commands::Get { url, format } => {
            if let Err(e) = settings.ensure_download_dir() {
                eprintln!(
                    "Error: cannot create download directory {}: {}",
                    settings.download_dir.display(),
                    e
                );
                std::process::exit(1);
            }
            let dispatcher = JobDispatcher::from_settings(&settings);
            cmd_get(&dispatcher, &url, format.as_deref()).await
        }
        Commands::Formats { url } => {
            let dispatcher = JobDispatcher::from_settings(&settings);
            cmd_formats(&dispatcher, &url).await
        }
        Commands::Channel { id } => cmd_channel(&settings, &id).await,
    };
    std::process::exit(code);
}
