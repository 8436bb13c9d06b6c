// Media fetch adapters
//
// One adapter over yt-dlp, runnable two ways:
// - native `yt-dlp` binary (default)
// - `python3 -m yt_dlp` when only the Python module is installed

mod ytdlp;

pub use ytdlp::YtDlpFetcher;
