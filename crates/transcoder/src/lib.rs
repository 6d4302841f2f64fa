#![allow(clippy::collapsible_if, clippy::redundant_closure)]
pub mod command;
pub mod encode;
pub mod ffprobe;
pub mod progress;
pub mod verify;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),
    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),
    #[error("ffmpeg exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}
