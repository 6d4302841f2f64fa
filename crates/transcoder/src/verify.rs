use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::ffprobe::{self, MediaInfo};

/// Reasons a finished encode is rejected before installation.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("output file does not exist: {}", .0.display())]
    Missing(PathBuf),
    #[error("output file too small: {size} bytes (min: {min})")]
    TooSmall { size: u64, min: u64 },
    #[error("failed to read output file metadata: {0}")]
    Unreadable(String),
    #[error("output file has no video stream")]
    NoVideoStream,
    #[error(
        "duration mismatch: {:.2}% (tolerance: {:.2}%)",
        .diff * 100.0,
        .tolerance * 100.0
    )]
    DurationMismatch { diff: f64, tolerance: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub min_file_size: u64,
    /// Allowed relative duration difference, e.g. `0.01` for 1%.
    pub duration_tolerance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifiedOutput {
    pub new_size: u64,
    pub new_duration: f64,
}

/// Check a finished encode against the source it came from.
pub async fn verify_output(
    ffprobe_path: &Path,
    output: &Path,
    original_duration: f64,
    opts: VerifyOptions,
) -> Result<VerifiedOutput, VerifyError> {
    let meta = match tokio::fs::metadata(output).await {
        Ok(m) if m.is_file() => m,
        _ => return Err(VerifyError::Missing(output.to_path_buf())),
    };

    let size = meta.len();
    if size < opts.min_file_size {
        return Err(VerifyError::TooSmall {
            size,
            min: opts.min_file_size,
        });
    }

    let info = ffprobe::probe(ffprobe_path, output)
        .await
        .map_err(|e| VerifyError::Unreadable(e.to_string()))?;

    check_media(&info, size, original_duration, opts)
}

/// The probe-dependent half of verification. A non-positive
/// `original_duration` skips the duration comparison.
pub fn check_media(
    info: &MediaInfo,
    size: u64,
    original_duration: f64,
    opts: VerifyOptions,
) -> Result<VerifiedOutput, VerifyError> {
    if !info.has_video() {
        return Err(VerifyError::NoVideoStream);
    }

    if original_duration > 0.0 {
        let diff = (info.duration_secs - original_duration).abs() / original_duration;
        if diff > opts.duration_tolerance {
            return Err(VerifyError::DurationMismatch {
                diff,
                tolerance: opts.duration_tolerance,
            });
        }
    }

    Ok(VerifiedOutput {
        new_size: size,
        new_duration: info.duration_secs,
    })
}
