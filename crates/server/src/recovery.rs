//! Startup reconciliation after an unclean shutdown.

use std::path::Path;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use vidslim_core::types::{JobStatus, LogLevel};
use vidslim_db::repo::{job_logs, jobs};

pub const RESET_NOTE: &str = "Reset after restart";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Jobs moved back to pending.
    pub reset: u64,
    /// Entries deleted from the processing directory.
    pub purged: u64,
}

/// Put every job a previous run left mid-flight back in the queue and clear
/// out the processing directory. Must run before the worker starts.
pub async fn recover(
    pool: &SqlitePool,
    processing_dir: &Path,
) -> Result<RecoveryReport, sqlx::Error> {
    let mut report = RecoveryReport::default();

    for job in jobs::list_by_status(pool, &JobStatus::IN_PROGRESS).await? {
        let reset = jobs::transition(
            pool,
            &job.id,
            &JobStatus::IN_PROGRESS,
            JobStatus::Pending,
            Some(RESET_NOTE),
        )
        .await?;
        if reset {
            info!(job_id = %job.id, from = %job.status, "reset interrupted job");
            job_logs::append(
                pool,
                &job.id,
                LogLevel::Warning,
                &format!("Job was {} when the service stopped; requeued", job.status),
            )
            .await?;
            report.reset += 1;
        }
    }

    report.purged = purge_dir(processing_dir).await;
    if report.reset > 0 || report.purged > 0 {
        info!(reset = report.reset, purged = report.purged, "recovery finished");
    }
    Ok(report)
}

/// Delete everything inside `dir`, keeping `dir` itself. Returns how many
/// top-level entries were removed.
async fn purge_dir(dir: &Path) -> u64 {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot read processing directory");
            return 0;
        }
    };

    let mut purged = 0;
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let path = entry.path();
        let result = match entry.file_type().await {
            Ok(ft) if ft.is_dir() => tokio::fs::remove_dir_all(&path).await,
            _ => tokio::fs::remove_file(&path).await,
        };
        match result {
            Ok(()) => purged += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to purge"),
        }
    }
    purged
}
