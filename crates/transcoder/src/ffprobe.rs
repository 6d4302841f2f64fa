use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::TranscodeError;

/// What ffprobe reports about a file, reduced to the fields the pipeline reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_secs: f64,
    /// First video stream, if any.
    pub video: Option<VideoStream>,
    pub video_stream_count: usize,
    /// Container-level tags with lowercased keys.
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStream {
    pub width: u32,
    pub height: u32,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video_stream_count > 0
    }

    pub fn comment(&self) -> Option<&str> {
        self.tags.get("comment").map(String::as_str)
    }

    /// True when the container comment carries `marker`, i.e. the file
    /// is already one of our own outputs.
    pub fn is_processed(&self, marker: &str) -> bool {
        !marker.is_empty() && self.comment().is_some_and(|c| c.contains(marker))
    }
}

/// Run ffprobe on a file and parse the JSON output.
pub async fn probe(ffprobe_path: &Path, file: &Path) -> Result<MediaInfo, TranscodeError> {
    let output = tokio::process::Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(file)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| TranscodeError::ProbeFailed(format!("spawn failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::ProbeFailed(format!(
            "{}: {}",
            file.display(),
            stderr.trim()
        )));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::ProbeFailed(format!("parse JSON: {e}")))?;

    parse_probe_output(&raw)
}

pub fn parse_probe_output(raw: &serde_json::Value) -> Result<MediaInfo, TranscodeError> {
    let format = raw
        .get("format")
        .ok_or_else(|| TranscodeError::ProbeFailed("missing 'format'".into()))?;

    let duration_secs = number_field(format, "duration").unwrap_or(0.0);

    let tags = format
        .get("tags")
        .and_then(|t| t.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.to_ascii_lowercase(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let streams = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut info = MediaInfo {
        duration_secs,
        tags,
        ..MediaInfo::default()
    };

    let videos = streams
        .iter()
        .filter(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"));
    for s in videos {
        info.video_stream_count += 1;
        if info.video.is_none() {
            info.video = Some(VideoStream {
                width: s.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                height: s.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            });
        }
    }

    Ok(info)
}

/// ffprobe prints numbers as strings; accept either form.
fn number_field(obj: &serde_json::Value, key: &str) -> Option<f64> {
    match obj.get(key)? {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
