// FormatSelector - format listing and quality label mapping
//
// Converts raw formats from the fetch adapter into a read-only listing:
// - video formats only (known height)
// - one entry per (height, container)
// - highest resolution first
// - approximate size for each entry

use std::cmp::Reverse;
use std::collections::HashSet;

use super::models::{FormatEntry, MediaInfo, RawFormat};
use super::utils::format_size;

pub struct FormatSelector;

impl FormatSelector {
    /// Build the format listing for resolved metadata
    pub fn list_formats(info: &MediaInfo) -> Vec<FormatEntry> {
        let mut video: Vec<&RawFormat> = info.formats.iter().filter(|f| f.has_video()).collect();

        // Highest resolution first; within a (height, container) group the
        // largest known size wins the dedup.
        video.sort_by_key(|f| {
            (
                Reverse(f.height.unwrap_or(0)),
                f.ext.clone(),
                Reverse(Self::approx_bytes(f, info.duration).unwrap_or(0)),
                f.format_id.clone(),
            )
        });

        let mut seen = HashSet::new();
        video
            .into_iter()
            .filter(|f| seen.insert((f.height.unwrap_or(0), f.ext.clone())))
            .map(|f| {
                let height = f.height.unwrap_or(0);
                FormatEntry {
                    format_id: f.format_id.clone(),
                    resolution: format!("{}p", height),
                    height,
                    container: f.ext.clone(),
                    approx_size: Self::approx_bytes(f, info.duration)
                        .map(format_size)
                        .unwrap_or_else(|| "unknown".to_string()),
                }
            })
            .collect()
    }

    /// Exact size, then the engine's estimate, then bitrate x duration
    fn approx_bytes(format: &RawFormat, duration: Option<f64>) -> Option<u64> {
        format.filesize.or(format.filesize_approx).or_else(|| {
            let tbr = format.tbr?;
            let secs = duration?;
            let bytes = tbr * 1000.0 / 8.0 * secs;
            (bytes > 0.0).then_some(bytes as u64)
        })
    }

    /// Get yt-dlp format spec for a quality label; anything else is passed
    /// through as a raw selector or format id.
    pub fn format_spec(quality: &str) -> String {
        match quality.trim() {
            "best" => "bv*+ba/best".to_string(),
            "1080p" => "bv*[height<=1080]+ba/b[height<=1080]/bv*+ba/best".to_string(),
            "720p" => "bv*[height<=720]+ba/b[height<=720]/bv*+ba/best".to_string(),
            "480p" => "bv*[height<=480]+ba/b[height<=480]/bv*+ba/best".to_string(),
            "360p" => "bv*[height<=360]+ba/b[height<=360]/bv*+ba/best".to_string(),
            "audio" => "ba/b".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_video_format(id: &str, height: u32, ext: &str, size: Option<u64>) -> RawFormat {
        RawFormat {
            format_id: id.to_string(),
            ext: ext.to_string(),
            width: Some(height * 16 / 9),
            height: Some(height),
            vcodec: Some("avc1.4d401f".to_string()),
            acodec: Some("none".to_string()),
            filesize: size,
            ..RawFormat::default()
        }
    }

    fn make_audio_format() -> RawFormat {
        RawFormat {
            format_id: "140".to_string(),
            ext: "m4a".to_string(),
            vcodec: Some("none".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            filesize: Some(5_000_000),
            ..RawFormat::default()
        }
    }

    fn info(formats: Vec<RawFormat>) -> MediaInfo {
        MediaInfo {
            id: "abc123".to_string(),
            title: "Clip".to_string(),
            ext: "mp4".to_string(),
            duration: Some(60.0),
            formats,
            ..MediaInfo::default()
        }
    }

    #[test]
    fn sorted_descending_without_duplicates() {
        let media = info(vec![
            make_video_format("18", 360, "mp4", Some(10_000_000)),
            make_video_format("137", 1080, "mp4", Some(100_000_000)),
            make_video_format("248", 1080, "webm", Some(90_000_000)),
            make_video_format("399", 1080, "mp4", Some(120_000_000)),
            make_video_format("22", 720, "mp4", None),
            make_audio_format(),
        ]);

        let listing = FormatSelector::list_formats(&media);
        let keys: Vec<(u32, &str)> = listing
            .iter()
            .map(|e| (e.height, e.container.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![(1080, "mp4"), (1080, "webm"), (720, "mp4"), (360, "mp4")]
        );

        // largest 1080p mp4 kept
        assert_eq!(listing[0].format_id, "399");
        assert_eq!(listing[0].resolution, "1080p");
        assert_eq!(listing[0].approx_size, "114 MB");
        assert_eq!(listing[2].approx_size, "unknown");

        let heights: Vec<u32> = listing.iter().map(|e| e.height).collect();
        assert!(heights.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn listing_is_deterministic() {
        let formats = vec![
            make_video_format("a", 720, "webm", Some(1)),
            make_video_format("b", 720, "mp4", Some(1)),
            make_video_format("c", 720, "mp4", Some(1)),
        ];
        let first = FormatSelector::list_formats(&info(formats.clone()));
        let mut reversed = formats;
        reversed.reverse();
        let second = FormatSelector::list_formats(&info(reversed));
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn size_estimated_from_bitrate() {
        let mut fmt = make_video_format("22", 720, "mp4", None);
        fmt.tbr = Some(1000.0); // 125 KB/s for 60s
        let listing = FormatSelector::list_formats(&info(vec![fmt]));
        assert_eq!(listing[0].approx_size, "7 MB");
    }

    #[test]
    fn quality_labels_map_to_selectors() {
        assert_eq!(FormatSelector::format_spec("audio"), "ba/b");
        assert!(FormatSelector::format_spec("720p").contains("height<=720"));
        assert_eq!(FormatSelector::format_spec("137+140"), "137+140");
    }
}
