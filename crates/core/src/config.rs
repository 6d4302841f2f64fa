//! Typed runtime settings with three layers: compiled defaults, `VIDSLIM_*`
//! environment overrides, and key/value overrides persisted in the database.
//!
//! The layers are merged once (defaults → environment → persisted) and the
//! result is validated as a whole. Later updates build a complete candidate
//! and validate it before anything is persisted or swapped in.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::types::Disposition;

pub const ENV_PREFIX: &str = "VIDSLIM_";

/// Keys that may come from the environment and be persisted in the `settings` table.
pub const PERSISTED_KEYS: &[&str] = &[
    "source_dir",
    "temp_dir",
    "config_dir",
    "video_preset",
    "video_crf",
    "video_film_grain",
    "audio_bitrate",
    "max_threads",
    "original_file_strategy",
    "archive_dir",
    "max_long_side",
    "max_short_side",
    "max_fps",
    "start_paused",
    "scan_ignore_patterns",
];

const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "mts", "m2ts",
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown setting: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("{key} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        key: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSettings {
    pub source_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub config_dir: PathBuf,
    pub video_preset: u32,
    pub video_crf: u32,
    pub video_film_grain: u32,
    pub audio_bitrate: String,
    pub max_threads: u32,
    pub original_file_strategy: Disposition,
    pub archive_dir: Option<PathBuf>,
    pub max_long_side: u32,
    pub max_short_side: u32,
    pub max_fps: u32,
    pub start_paused: bool,
    pub scan_ignore_patterns: String,

    // Not persisted.
    pub processed_marker: String,
    pub duration_tolerance: f64,
    pub min_file_size: u64,
    pub video_extensions: BTreeSet<String>,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub bind_addr: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("/source"),
            temp_dir: PathBuf::from("/temp"),
            config_dir: PathBuf::from("/config"),
            video_preset: 6,
            video_crf: 30,
            video_film_grain: 0,
            audio_bitrate: "64k".to_string(),
            max_threads: 0,
            original_file_strategy: Disposition::Trash,
            archive_dir: None,
            max_long_side: 0,
            max_short_side: 0,
            max_fps: 0,
            start_paused: false,
            scan_ignore_patterns: String::new(),
            processed_marker: "VidSlim-Processed".to_string(),
            duration_tolerance: 0.01,
            min_file_size: 10 * 1024,
            video_extensions: DEFAULT_VIDEO_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl RuntimeSettings {
    /// Merge all three layers and validate the result.
    pub fn load<F, I>(env: F, persisted: I) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Self::default();
        settings.apply_env(env)?;
        settings.apply_persisted(persisted)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `VIDSLIM_<KEY>` variables. `env` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in PERSISTED_KEYS {
            let var = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
            if let Some(value) = env(&var) {
                self.set(key, &value)?;
            }
        }
        if let Some(v) = env("VIDSLIM_FFMPEG") {
            self.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = env("VIDSLIM_FFPROBE") {
            self.ffprobe_path = PathBuf::from(v);
        }
        if let Some(v) = env("VIDSLIM_BIND") {
            self.bind_addr = v;
        }
        Ok(())
    }

    /// Apply persisted key/value rows. Keys outside [`PERSISTED_KEYS`] are ignored.
    pub fn apply_persisted<I>(&mut self, rows: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in rows {
            if PERSISTED_KEYS.contains(&key.as_str()) {
                self.set(&key, &value)?;
            }
        }
        Ok(())
    }

    /// Build a validated copy with `updates` applied. `self` is left untouched.
    pub fn with_updates(&self, updates: &[(String, String)]) -> Result<Self, ConfigError> {
        let mut candidate = self.clone();
        for (key, value) in updates {
            candidate.set(key, value)?;
        }
        candidate.validate()?;
        Ok(candidate)
    }

    /// Set one persisted key from its string form. Ranges are checked by [`validate`](Self::validate).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "source_dir" => self.source_dir = PathBuf::from(value),
            "temp_dir" => self.temp_dir = PathBuf::from(value),
            "config_dir" => self.config_dir = PathBuf::from(value),
            "video_preset" => self.video_preset = parse_u32(key, value)?,
            "video_crf" => self.video_crf = parse_u32(key, value)?,
            "video_film_grain" => self.video_film_grain = parse_u32(key, value)?,
            "audio_bitrate" => self.audio_bitrate = value.trim().to_string(),
            "max_threads" => self.max_threads = parse_u32(key, value)?,
            "original_file_strategy" => {
                self.original_file_strategy =
                    value.parse().map_err(|message| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message,
                    })?
            }
            "archive_dir" => {
                let trimmed = value.trim();
                self.archive_dir = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
            }
            "max_long_side" => self.max_long_side = parse_u32(key, value)?,
            "max_short_side" => self.max_short_side = parse_u32(key, value)?,
            "max_fps" => self.max_fps = parse_u32(key, value)?,
            "start_paused" => self.start_paused = parse_bool(key, value)?,
            "scan_ignore_patterns" => self.scan_ignore_patterns = value.to_string(),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// String form of a persisted key, as it is stored in the settings table.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "source_dir" => self.source_dir.display().to_string(),
            "temp_dir" => self.temp_dir.display().to_string(),
            "config_dir" => self.config_dir.display().to_string(),
            "video_preset" => self.video_preset.to_string(),
            "video_crf" => self.video_crf.to_string(),
            "video_film_grain" => self.video_film_grain.to_string(),
            "audio_bitrate" => self.audio_bitrate.clone(),
            "max_threads" => self.max_threads.to_string(),
            "original_file_strategy" => self.original_file_strategy.to_string(),
            "archive_dir" => self
                .archive_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "max_long_side" => self.max_long_side.to_string(),
            "max_short_side" => self.max_short_side.to_string(),
            "max_fps" => self.max_fps.to_string(),
            "start_paused" => self.start_paused.to_string(),
            "scan_ignore_patterns" => self.scan_ignore_patterns.clone(),
            _ => return None,
        };
        Some(value)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("video_preset", self.video_preset, 0, 13)?;
        check_range("video_crf", self.video_crf, 0, 63)?;
        check_range("video_film_grain", self.video_film_grain, 0, 50)?;

        let bitrate = self.audio_bitrate.as_str();
        let digits = bitrate.trim_end_matches(['k', 'K', 'm', 'M']);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue {
                key: "audio_bitrate".into(),
                message: format!("expected a bitrate like 64k, got {bitrate:?}"),
            });
        }

        if !(self.duration_tolerance >= 0.0 && self.duration_tolerance.is_finite()) {
            return Err(ConfigError::InvalidValue {
                key: "duration_tolerance".into(),
                message: "must be a non-negative fraction".into(),
            });
        }

        for (key, path) in [
            ("source_dir", &self.source_dir),
            ("temp_dir", &self.temp_dir),
            ("config_dir", &self.config_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "must not be empty".into(),
                });
            }
        }
        Ok(())
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.temp_dir.join("trash")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.temp_dir.join("processing")
    }

    pub fn db_path(&self) -> PathBuf {
        self.config_dir.join("vidslim.db")
    }

    /// Root under which originals are kept after installation. Archive without
    /// an archive directory falls back to the trash.
    pub fn disposition_root(&self) -> PathBuf {
        match (self.original_file_strategy, &self.archive_dir) {
            (Disposition::Archive, Some(dir)) => dir.clone(),
            _ => self.trash_dir(),
        }
    }

    pub fn is_video_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.video_extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Ignore patterns, one per non-blank line.
    pub fn ignore_patterns(&self) -> Vec<String> {
        split_patterns(&self.scan_ignore_patterns)
    }
}

pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn check_range(key: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key,
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let s = RuntimeSettings::default();
        s.validate().unwrap();
        assert_eq!(s.processing_dir(), PathBuf::from("/temp/processing"));
        assert_eq!(s.trash_dir(), PathBuf::from("/temp/trash"));
        assert_eq!(s.db_path(), PathBuf::from("/config/vidslim.db"));
    }

    #[test]
    fn persisted_beats_env_beats_default() {
        let env = env_of(&[
            ("VIDSLIM_VIDEO_CRF", "40"),
            ("VIDSLIM_VIDEO_PRESET", "8"),
            ("VIDSLIM_START_PAUSED", "yes"),
        ]);
        let s = RuntimeSettings::load(env, rows(&[("video_crf", "35")])).unwrap();
        assert_eq!(s.video_crf, 35);
        assert_eq!(s.video_preset, 8);
        assert_eq!(s.video_film_grain, 0);
        assert!(s.start_paused);
    }

    #[test]
    fn unknown_persisted_keys_are_ignored() {
        let s = RuntimeSettings::load(env_of(&[]), rows(&[("theme", "dark")])).unwrap();
        assert_eq!(s.video_crf, 30);
    }

    #[test]
    fn merged_result_is_validated() {
        let err = RuntimeSettings::load(env_of(&[("VIDSLIM_VIDEO_CRF", "99")]), rows(&[]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                key: "video_crf",
                value: 99,
                min: 0,
                max: 63
            }
        );
    }

    #[test]
    fn with_updates_leaves_original_untouched_on_error() {
        let s = RuntimeSettings::default();
        let err = s
            .with_updates(&rows(&[("video_preset", "3"), ("video_film_grain", "51")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: "video_film_grain", .. }));
        assert_eq!(s.video_preset, 6);

        let err = s.with_updates(&rows(&[("nope", "1")])).unwrap_err();
        assert_eq!(err, ConfigError::UnknownKey("nope".into()));
    }

    #[test]
    fn archive_without_dir_falls_back_to_trash() {
        let s = RuntimeSettings::default()
            .with_updates(&rows(&[("original_file_strategy", "archive"), ("archive_dir", "")]))
            .unwrap();
        assert_eq!(s.disposition_root(), s.trash_dir());

        let s = s.with_updates(&rows(&[("archive_dir", "/archive")])).unwrap();
        assert_eq!(s.disposition_root(), PathBuf::from("/archive"));
    }

    #[test]
    fn get_and_set_agree_for_every_persisted_key() {
        let s = RuntimeSettings::default();
        for key in PERSISTED_KEYS {
            let value = s.get(key).unwrap();
            let mut copy = RuntimeSettings::default();
            copy.set(key, &value).unwrap();
            assert_eq!(copy.get(key).unwrap(), value, "key {key}");
        }
    }

    #[test]
    fn bad_bitrate_and_bool_are_rejected() {
        let s = RuntimeSettings::default();
        assert!(s.with_updates(&rows(&[("audio_bitrate", "loud")])).is_err());
        assert!(s.with_updates(&rows(&[("start_paused", "maybe")])).is_err());
        assert!(s.with_updates(&rows(&[("audio_bitrate", "96k")])).is_ok());
    }

    #[test]
    fn video_extension_match_is_case_insensitive() {
        let s = RuntimeSettings::default();
        assert!(s.is_video_path(Path::new("/a/B.MKV")));
        assert!(s.is_video_path(Path::new("clip.m2ts")));
        assert!(!s.is_video_path(Path::new("notes.txt")));
        assert!(!s.is_video_path(Path::new("noext")));
    }

    #[test]
    fn patterns_split_on_lines() {
        assert_eq!(
            split_patterns("  *.ts\n\nextras/\n"),
            vec!["*.ts".to_string(), "extras/".to_string()]
        );
    }
}
