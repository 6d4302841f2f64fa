use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use vidslim_core::config::{RuntimeSettings, split_patterns};
use vidslim_core::types::JobStatus;
use vidslim_db::repo::jobs;
use vidslim_transcoder::ffprobe;

use crate::ignore::IgnoreMatcher;
use crate::progress::{ScanPhase, ScanProgressTracker};
use crate::walk::{self, VideoEntry};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub created: u64,
    pub removed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds unprocessed videos under the source root and keeps the pending
/// queue in line with the filesystem and the ignore patterns.
#[derive(Debug, Clone)]
pub struct Scanner {
    pool: SqlitePool,
    progress: ScanProgressTracker,
}

impl Scanner {
    pub fn new(pool: SqlitePool, progress: ScanProgressTracker) -> Self {
        Self { pool, progress }
    }

    pub fn progress(&self) -> &ScanProgressTracker {
        &self.progress
    }

    /// Run one full scan. Only one scan may run at a time.
    pub async fn scan(&self, settings: &RuntimeSettings) -> Result<ScanReport, ScanError> {
        if !self.progress.try_start().await {
            return Err(ScanError::AlreadyRunning);
        }
        let result = self.run(settings).await;
        self.progress.finish().await;

        match &result {
            Ok(report) => info!(
                created = report.created,
                removed = report.removed,
                "scan finished"
            ),
            Err(e) => warn!(error = %e, "scan failed"),
        }
        result
    }

    async fn run(&self, settings: &RuntimeSettings) -> Result<ScanReport, ScanError> {
        let matcher = IgnoreMatcher::new(&settings.ignore_patterns())?;
        let mut report = ScanReport::default();

        self.progress.set_phase(ScanPhase::RemovingIgnored).await;
        report.removed = self.reconcile_pending(&matcher).await?;
        self.progress.set_jobs_removed(report.removed).await;

        self.progress.set_phase(ScanPhase::ListingFiles).await;
        if !settings.source_dir.is_dir() {
            warn!(path = %settings.source_dir.display(), "source directory does not exist");
            return Ok(report);
        }
        let entries = list_videos(settings).await?;
        info!(
            path = %settings.source_dir.display(),
            files_found = entries.len(),
            "scan found video files"
        );

        self.progress.set_phase(ScanPhase::CheckingMetadata).await;
        let known: HashSet<String> = jobs::source_paths(&self.pool).await?.into_iter().collect();
        let mut candidates = Vec::new();

        for entry in entries {
            self.progress.set_current_file(&entry.relative_path).await;
            self.progress.increment_checked().await;

            if matcher.is_ignored(Path::new(&entry.relative_path)) {
                debug!(file = %entry.relative_path, "skipping ignored file");
                continue;
            }
            let path_str = entry.path.to_string_lossy().into_owned();
            if known.contains(&path_str) {
                continue;
            }

            match ffprobe::probe(&settings.ffprobe_path, &entry.path).await {
                Ok(info) if info.is_processed(&settings.processed_marker) => {
                    debug!(file = %entry.relative_path, "already processed");
                    continue;
                }
                Ok(_) => {}
                // Unreadable files still get a job; the worker records the failure.
                Err(e) => warn!(file = %entry.relative_path, error = %e, "probe failed"),
            }

            self.progress.increment_found().await;
            candidates.push((path_str, entry));
        }

        self.progress.set_phase(ScanPhase::CreatingJobs).await;
        for (path_str, entry) in &candidates {
            let created = jobs::create_job(
                &self.pool,
                path_str,
                &entry.relative_path,
                entry.size_bytes as i64,
            )
            .await?;
            if created.is_some() {
                report.created += 1;
                self.progress.set_jobs_created(report.created).await;
            }
        }

        Ok(report)
    }

    /// Drop pending jobs whose file is now ignored or gone. Jobs in any
    /// other status are history and stay.
    async fn reconcile_pending(&self, matcher: &IgnoreMatcher) -> Result<u64, ScanError> {
        let pending = jobs::list_by_status(&self.pool, &[JobStatus::Pending]).await?;
        let mut removed = 0;

        for job in pending {
            let reason = if matcher.is_ignored(Path::new(&job.relative_path)) {
                "ignored"
            } else if !tokio::fs::try_exists(&job.source_path).await.unwrap_or(false) {
                "missing"
            } else {
                continue;
            };

            if jobs::delete_pending(&self.pool, &job.id).await? {
                info!(job_id = %job.id, file = %job.relative_path, reason, "removed pending job");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Directories under the source root that belong to us, not the library.
fn excluded_dirs(settings: &RuntimeSettings) -> Vec<PathBuf> {
    let mut dirs = vec![
        settings.temp_dir.clone(),
        settings.trash_dir(),
        settings.processing_dir(),
    ];
    if let Some(archive) = &settings.archive_dir {
        dirs.push(archive.clone());
    }
    dirs
}

async fn list_videos(settings: &RuntimeSettings) -> Result<Vec<VideoEntry>, ScanError> {
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || {
        let exclude = excluded_dirs(&settings);
        walk::walk_video_files(&settings.source_dir, &exclude, |p| settings.is_video_path(p))
    })
    .await
    .map_err(|e| ScanError::Io(std::io::Error::other(e)))
}

/// Relative paths of in-scope videos that `raw_patterns` would exclude,
/// sorted. Touches no jobs.
pub async fn preview_ignored(
    settings: &RuntimeSettings,
    raw_patterns: &str,
) -> Result<Vec<String>, ScanError> {
    let matcher = IgnoreMatcher::new(&split_patterns(raw_patterns))?;
    if matcher.is_empty() || !settings.source_dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = list_videos(settings).await?;
    Ok(entries
        .into_iter()
        .filter(|e| matcher.is_ignored(Path::new(&e.relative_path)))
        .map(|e| e.relative_path)
        .collect())
}
