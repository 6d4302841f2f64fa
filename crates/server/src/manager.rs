//! The single background worker and the job state machine.
//!
//! One job runs at a time. The worker waits while paused, picks the oldest
//! pending job, and drives it through transcoding, verification and
//! installation. Control operations (pause, cancel, retry, rollback) are
//! exposed as methods on [`JobManager`]; nothing outside this module
//! mutates worker state directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, Notify, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vidslim_core::config::RuntimeSettings;
use vidslim_core::types::{JobStatus, LogLevel};
use vidslim_db::repo::jobs::{self, Completion, JobRow};
use vidslim_db::repo::job_logs;
use vidslim_transcoder::TranscodeError;
use vidslim_transcoder::command::{self, EncodeOptions, Resolution};
use vidslim_transcoder::encode::{self, TranscodeOutcome};
use vidslim_transcoder::ffprobe;
use vidslim_transcoder::progress::TranscodeProgress;
use vidslim_transcoder::verify::{self, VerifyError, VerifyOptions};

use crate::fsops;
use crate::logs::LogBroadcaster;
use crate::settings::SettingsManager;

/// Sleep between polls when the queue is empty.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Progress snapshots buffered between the ffmpeg reader and the consumer.
const PROGRESS_QUEUE: usize = 32;

/// Live view of the running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub job_id: String,
    pub relative_path: String,
    pub phase: JobStatus,
    pub fps: f64,
    pub speed: f64,
    pub progress: f64,
    pub eta_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub paused: bool,
    pub current: Option<JobProgress>,
}

/// Errors returned to callers of the control operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("cannot {action} job {id} in status {status}")]
    InvalidState {
        id: String,
        status: JobStatus,
        action: &'static str,
    },
    #[error("no job is running")]
    NotRunning,
    #[error("rollback failed: {0}")]
    Restore(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Reasons a job ends up `failed`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("probe failed: {0}")]
    Probe(TranscodeError),
    #[error("transcode failed: {0}")]
    Transcode(TranscodeError),
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("install failed: {0}")]
    Install(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

enum RunResult {
    Completed,
    Requeued,
    Skipped,
}

struct ActiveJob {
    job_id: String,
    cancel: CancellationToken,
}

struct Inner {
    pool: SqlitePool,
    settings: SettingsManager,
    logs: LogBroadcaster,
    poll_interval: Duration,
    paused: watch::Sender<bool>,
    wake: Notify,
    shutdown: Mutex<CancellationToken>,
    active: Mutex<Option<ActiveJob>>,
    current: RwLock<Option<JobProgress>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(
        pool: SqlitePool,
        settings: SettingsManager,
        logs: LogBroadcaster,
        start_paused: bool,
    ) -> Self {
        Self::with_poll_interval(pool, settings, logs, start_paused, POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        pool: SqlitePool,
        settings: SettingsManager,
        logs: LogBroadcaster,
        start_paused: bool,
        poll_interval: Duration,
    ) -> Self {
        let (paused, _) = watch::channel(start_paused);
        Self {
            inner: Arc::new(Inner {
                pool,
                settings,
                logs,
                poll_interval,
                paused,
                wake: Notify::new(),
                shutdown: Mutex::new(CancellationToken::new()),
                active: Mutex::new(None),
                current: RwLock::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn the worker. Calling it while a worker is running does nothing.
    pub async fn start(&self) {
        let mut worker = self.inner.worker.lock().await;
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let shutdown = CancellationToken::new();
        *self.inner.shutdown.lock().await = shutdown.clone();

        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(run_worker(inner, shutdown)));
        info!(paused = self.is_paused(), "worker started");
    }

    /// Stop the worker and wait for it. A running job is cancelled and
    /// returns to `pending`.
    pub async fn stop(&self) {
        self.inner.shutdown.lock().await.cancel();
        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked");
            }
            info!("worker stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Nudge an idle worker to poll now instead of waiting out its sleep.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    // ------------------------------------------------------------------
    // Pause / resume / cancel
    // ------------------------------------------------------------------

    /// Stop picking up new jobs. With `immediate`, the running job is
    /// cancelled too and goes back to `pending`.
    pub async fn pause(&self, immediate: bool) {
        self.inner.paused.send_replace(true);
        info!(immediate, "worker paused");
        if immediate {
            let _ = self.cancel_current().await;
        }
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        info!("worker resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Cancel whatever is running. Returns the cancelled job id.
    pub async fn cancel_current(&self) -> Result<String, ControlError> {
        let active = self.inner.active.lock().await;
        let active = active.as_ref().ok_or(ControlError::NotRunning)?;
        active.cancel.cancel();
        info!(job_id = %active.job_id, "cancel requested");
        Ok(active.job_id.clone())
    }

    /// Cancel `job_id` if it is the running job.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), ControlError> {
        {
            let active = self.inner.active.lock().await;
            if let Some(active) = active.as_ref().filter(|a| a.job_id == job_id) {
                active.cancel.cancel();
                info!(job_id, "cancel requested");
                return Ok(());
            }
        }
        let job = self.get_job(job_id).await?;
        Err(ControlError::InvalidState {
            id: job.id,
            status: job.status,
            action: "cancel",
        })
    }

    // ------------------------------------------------------------------
    // Retry / rollback
    // ------------------------------------------------------------------

    /// Requeue a `failed`, `cancelled` or `rolled_back` job.
    pub async fn retry_job(&self, job_id: &str) -> Result<JobRow, ControlError> {
        let job = self.get_job(job_id).await?;
        let invalid = |status| ControlError::InvalidState {
            id: job_id.to_string(),
            status,
            action: "retry",
        };
        if !job.status.can_retry() {
            return Err(invalid(job.status));
        }

        let moved = jobs::transition(
            &self.inner.pool,
            job_id,
            &JobStatus::RETRYABLE,
            JobStatus::Pending,
            None,
        )
        .await?;
        if !moved {
            // Raced with another status change.
            let current = self.get_job(job_id).await?;
            return Err(invalid(current.status));
        }

        info!(job_id, from = %job.status, "job queued for retry");
        self.inner
            .log(job_id, LogLevel::Info, "Job queued for retry")
            .await;
        self.wake();
        self.get_job(job_id).await
    }

    /// Undo a completed job: delete the installed file, put the original
    /// back where it came from and take the savings off the stats.
    pub async fn rollback_job(&self, job_id: &str) -> Result<JobRow, ControlError> {
        let job = self.get_job(job_id).await?;
        if !job.status.can_rollback() {
            return Err(ControlError::InvalidState {
                id: job.id,
                status: job.status,
                action: "rollback",
            });
        }

        let settings = self.inner.settings.current().await;
        let source = PathBuf::from(&job.source_path);
        let installed = job
            .installed_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| installed_path_for(&source));
        let disposed = job
            .disposed_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| settings.disposition_root().join(&job.relative_path));

        if !tokio::fs::try_exists(&disposed).await.unwrap_or(false) {
            return Err(ControlError::Restore(format!(
                "original not found at {}",
                disposed.display()
            )));
        }

        match tokio::fs::remove_file(&installed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(job_id, path = %installed.display(), "installed file already gone");
            }
            Err(e) => {
                return Err(ControlError::Restore(format!(
                    "cannot remove {}: {e}",
                    installed.display()
                )));
            }
        }
        fsops::move_file(&disposed, &source).await.map_err(|e| {
            ControlError::Restore(format!(
                "cannot move {} back to {}: {e}",
                disposed.display(),
                source.display()
            ))
        })?;

        let Some(saved) = jobs::rollback_job(&self.inner.pool, job_id).await? else {
            let current = self.get_job(job_id).await?;
            return Err(ControlError::InvalidState {
                id: current.id,
                status: current.status,
                action: "rollback",
            });
        };

        info!(job_id, saved_bytes = saved, "job rolled back");
        self.inner
            .log(
                job_id,
                LogLevel::Info,
                &format!("Rolled back: original restored, {saved} bytes removed from stats"),
            )
            .await;
        self.get_job(job_id).await
    }

    // ------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------

    pub async fn current_progress(&self) -> Option<JobProgress> {
        self.inner.current.read().await.clone()
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            running: self.is_running().await,
            paused: self.is_paused(),
            current: self.current_progress().await,
        }
    }

    async fn get_job(&self, job_id: &str) -> Result<JobRow, ControlError> {
        jobs::get_job(&self.inner.pool, job_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(job_id.to_string()))
    }
}

impl Inner {
    /// Persist a job log line and push it to live viewers.
    async fn log(&self, job_id: &str, level: LogLevel, message: &str) {
        match job_logs::append(&self.pool, job_id, level, message).await {
            Ok(entry) => self.logs.broadcast(&entry),
            Err(e) => warn!(job_id, error = %e, "failed to write job log"),
        }
    }

    async fn fail(&self, job_id: &str, message: &str) {
        if let Err(e) = jobs::mark_failed(&self.pool, job_id, message).await {
            error!(job_id, error = %e, "failed to mark job failed");
        }
        self.log(job_id, LogLevel::Error, message).await;
    }

    async fn set_phase(&self, job: &JobRow, phase: JobStatus) -> Result<(), sqlx::Error> {
        if phase != JobStatus::Transcoding {
            jobs::set_status(&self.pool, &job.id, phase).await?;
        }
        let mut current = self.current.write().await;
        if let Some(p) = current.as_mut().filter(|p| p.job_id == job.id) {
            p.phase = phase;
        } else {
            *current = Some(JobProgress {
                job_id: job.id.clone(),
                relative_path: job.relative_path.clone(),
                phase,
                fps: 0.0,
                speed: 0.0,
                progress: 0.0,
                eta_seconds: 0.0,
            });
        }
        Ok(())
    }

    async fn record_progress(&self, job_id: &str, snapshot: &TranscodeProgress) {
        let mut current = self.current.write().await;
        if let Some(p) = current.as_mut().filter(|p| p.job_id == job_id) {
            p.fps = snapshot.fps;
            p.speed = snapshot.speed;
            p.progress = snapshot.progress;
            p.eta_seconds = snapshot.eta_seconds;
        }
    }
}

/// Encoder options for `settings`, with an optional downscale.
pub fn encode_options(settings: &RuntimeSettings, scale: Option<Resolution>) -> EncodeOptions {
    EncodeOptions {
        preset: settings.video_preset,
        crf: settings.video_crf,
        film_grain: settings.video_film_grain,
        audio_bitrate: settings.audio_bitrate.clone(),
        max_threads: settings.max_threads,
        max_fps: settings.max_fps,
        marker: settings.processed_marker.clone(),
        scale,
    }
}

/// Output is always Matroska, installed next to where the source was.
fn installed_path_for(source: &Path) -> PathBuf {
    source.with_extension("mkv")
}

fn processing_path(settings: &RuntimeSettings, job: &JobRow) -> PathBuf {
    let stem = Path::new(&job.source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    settings
        .processing_dir()
        .join(format!("{}_{stem}.mkv", job.id))
}

// ----------------------------------------------------------------------
// Worker loop
// ----------------------------------------------------------------------

async fn run_worker(inner: Arc<Inner>, shutdown: CancellationToken) {
    let mut paused = inner.paused.subscribe();
    loop {
        if !wait_until_resumed(&mut paused, &shutdown).await {
            break;
        }

        let next = match jobs::next_pending(&inner.pool).await {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "failed to poll for pending jobs");
                None
            }
        };

        match next {
            Some(job) => run_one(&inner, job, &shutdown).await,
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = inner.wake.notified() => {}
                    _ = tokio::time::sleep(inner.poll_interval) => {}
                }
            }
        }

        if shutdown.is_cancelled() {
            break;
        }
    }
    debug!("worker loop exited");
}

/// Block while paused. Returns false if shutdown fired first.
async fn wait_until_resumed(
    paused: &mut watch::Receiver<bool>,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        if shutdown.is_cancelled() {
            return false;
        }
        if !*paused.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            changed = paused.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Run one job in its own task so a panic fails the job, not the worker.
async fn run_one(inner: &Arc<Inner>, job: JobRow, shutdown: &CancellationToken) {
    let cancel = shutdown.child_token();
    *inner.active.lock().await = Some(ActiveJob {
        job_id: job.id.clone(),
        cancel: cancel.clone(),
    });

    // One settings snapshot for the whole run.
    let settings = inner.settings.current().await;
    let output = processing_path(&settings, &job);

    let job_id = job.id.clone();
    let task = tokio::spawn(process_job(
        inner.clone(),
        job,
        settings,
        output.clone(),
        cancel,
    ));
    if let Err(e) = task.await {
        error!(job_id = %job_id, error = %e, "job task aborted");
        abandon(inner, &job_id, &output, &e.to_string()).await;
    }

    *inner.active.lock().await = None;
    *inner.current.write().await = None;
}

/// Clean up after a job task that died without reporting back.
async fn abandon(inner: &Inner, job_id: &str, output: &Path, reason: &str) {
    encode::remove_partial(output).await;
    inner.fail(job_id, &format!("unexpected error: {reason}")).await;
}

async fn process_job(
    inner: Arc<Inner>,
    job: JobRow,
    settings: Arc<RuntimeSettings>,
    output: PathBuf,
    cancel: CancellationToken,
) {
    match drive_job(&inner, &job, &settings, &output, &cancel).await {
        Ok(RunResult::Completed) => {}
        Ok(RunResult::Requeued) => {
            info!(job_id = %job.id, "job returned to queue");
        }
        Ok(RunResult::Skipped) => {
            debug!(job_id = %job.id, "job no longer pending, skipped");
        }
        Err(e) => {
            encode::remove_partial(&output).await;
            error!(job_id = %job.id, file = %job.relative_path, error = %e, "job failed");
            inner.fail(&job.id, &e.to_string()).await;
        }
    }
}

async fn drive_job(
    inner: &Inner,
    job: &JobRow,
    settings: &RuntimeSettings,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<RunResult, JobError> {
    job_logs::clear_for_job(&inner.pool, &job.id).await?;

    let claimed = jobs::transition(
        &inner.pool,
        &job.id,
        &[JobStatus::Pending],
        JobStatus::Transcoding,
        None,
    )
    .await?;
    if !claimed {
        return Ok(RunResult::Skipped);
    }
    inner.set_phase(job, JobStatus::Transcoding).await?;
    info!(job_id = %job.id, file = %job.relative_path, "job started");
    inner
        .log(&job.id, LogLevel::Info, &format!("Starting: {}", job.relative_path))
        .await;

    let source = PathBuf::from(&job.source_path);
    let info = ffprobe::probe(&settings.ffprobe_path, &source)
        .await
        .map_err(JobError::Probe)?;
    jobs::set_original_duration(&inner.pool, &job.id, info.duration_secs).await?;

    let scale = info.video.as_ref().and_then(|v| {
        command::target_resolution(
            v.width,
            v.height,
            settings.max_long_side,
            settings.max_short_side,
        )
    });
    if let (Some(video), Some(target)) = (&info.video, scale) {
        inner
            .log(
                &job.id,
                LogLevel::Info,
                &format!("Scaling {}x{} to {target}", video.width, video.height),
            )
            .await;
    }

    let opts = encode_options(settings, scale);
    let args = command::build_encode_args(&source, output, &opts);
    inner
        .log(
            &job.id,
            LogLevel::Info,
            &format!("Command: {}", command::render_command(&settings.ffmpeg_path, &args)),
        )
        .await;

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let (progress_tx, mut progress_rx) = mpsc::channel::<TranscodeProgress>(PROGRESS_QUEUE);
    let consumer = {
        let job_id = job.id.clone();
        async move {
            while let Some(snapshot) = progress_rx.recv().await {
                inner.record_progress(&job_id, &snapshot).await;
            }
        }
    };
    let encode = encode::run_encode(
        &settings.ffmpeg_path,
        &args,
        output,
        info.duration_secs,
        cancel,
        Some(progress_tx),
    );
    // The consumer ends once the encoder drops its sender.
    let (outcome, ()) = tokio::join!(encode, consumer);

    match outcome.map_err(JobError::Transcode)? {
        TranscodeOutcome::Cancelled => {
            jobs::transition(
                &inner.pool,
                &job.id,
                &[JobStatus::Transcoding],
                JobStatus::Pending,
                None,
            )
            .await?;
            inner
                .log(
                    &job.id,
                    LogLevel::Warning,
                    "Transcode cancelled; job returned to queue",
                )
                .await;
            return Ok(RunResult::Requeued);
        }
        TranscodeOutcome::Completed(_) => {}
    }

    inner.set_phase(job, JobStatus::Verifying).await?;
    let verified = verify::verify_output(
        &settings.ffprobe_path,
        output,
        info.duration_secs,
        VerifyOptions {
            min_file_size: settings.min_file_size,
            duration_tolerance: settings.duration_tolerance,
        },
    )
    .await?;
    inner
        .log(
            &job.id,
            LogLevel::Info,
            &format!(
                "Verified output: {} bytes, {:.1}s",
                verified.new_size, verified.new_duration
            ),
        )
        .await;

    inner.set_phase(job, JobStatus::Installing).await?;
    let (installed, disposed) = install(settings, job, &source, output).await?;
    inner
        .log(
            &job.id,
            LogLevel::Info,
            &format!(
                "Installed {}; original moved to {}",
                installed.display(),
                disposed.display()
            ),
        )
        .await;

    let new_size = verified.new_size as i64;
    let installed_str = installed.to_string_lossy();
    let disposed_str = disposed.to_string_lossy();
    jobs::complete_job(
        &inner.pool,
        &job.id,
        &Completion {
            new_size,
            new_duration: verified.new_duration,
            installed_path: &installed_str,
            disposed_path: &disposed_str,
        },
    )
    .await?;

    let saved = job.original_size - new_size;
    let percent = if job.original_size > 0 {
        saved as f64 * 100.0 / job.original_size as f64
    } else {
        0.0
    };
    info!(job_id = %job.id, saved_bytes = saved, "job completed");
    inner
        .log(
            &job.id,
            LogLevel::Info,
            &format!("Completed: saved {saved} bytes ({percent:.1}%)"),
        )
        .await;
    Ok(RunResult::Completed)
}

/// Move the original to its disposition location and the output into its
/// place. If the second move fails the original is put back.
async fn install(
    settings: &RuntimeSettings,
    job: &JobRow,
    source: &Path,
    output: &Path,
) -> Result<(PathBuf, PathBuf), JobError> {
    let installed = installed_path_for(source);
    if installed != source && tokio::fs::try_exists(&installed).await? {
        return Err(JobError::Install(format!(
            "{} already exists",
            installed.display()
        )));
    }

    let disposed = settings.disposition_root().join(&job.relative_path);
    fsops::move_file(source, &disposed).await.map_err(|e| {
        JobError::Install(format!(
            "cannot move original to {}: {e}",
            disposed.display()
        ))
    })?;

    if let Err(e) = fsops::move_file(output, &installed).await {
        if let Err(restore) = fsops::move_file(&disposed, source).await {
            error!(
                job_id = %job.id,
                original = %disposed.display(),
                error = %restore,
                "could not restore original after failed install"
            );
        }
        return Err(JobError::Install(format!(
            "cannot move output to {}: {e}",
            installed.display()
        )));
    }

    Ok((installed, disposed))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> (JobManager, SqlitePool) {
        let pool = vidslim_db::connect(":memory:").await.unwrap();
        vidslim_db::migrate::run(&pool).await.unwrap();
        let settings = SettingsManager::with_settings(pool.clone(), RuntimeSettings::default());
        let manager = JobManager::new(pool.clone(), settings, LogBroadcaster::new(), false);
        (manager, pool)
    }

    async fn job_in(pool: &SqlitePool, name: &str, status: JobStatus) -> JobRow {
        let job = jobs::create_job(pool, &format!("/src/{name}"), name, 100)
            .await
            .unwrap()
            .unwrap();
        jobs::set_status(pool, &job.id, status).await.unwrap();
        job
    }

    #[tokio::test]
    async fn retry_only_from_retryable_statuses() {
        let (manager, pool) = manager().await;

        for status in JobStatus::ALL {
            let job = job_in(&pool, &format!("{status}.mkv"), status).await;
            let result = manager.retry_job(&job.id).await;
            if status.can_retry() {
                let job = result.unwrap();
                assert_eq!(job.status, JobStatus::Pending);
                assert!(job.error.is_none());
            } else {
                assert!(
                    matches!(result, Err(ControlError::InvalidState { status: s, .. }) if s == status),
                    "retry from {status} should be rejected"
                );
            }
        }
    }

    #[tokio::test]
    async fn rollback_rejected_unless_completed() {
        let (manager, pool) = manager().await;
        for status in JobStatus::ALL.into_iter().filter(|s| !s.can_rollback()) {
            let job = job_in(&pool, &format!("{status}.mkv"), status).await;
            assert!(matches!(
                manager.rollback_job(&job.id).await,
                Err(ControlError::InvalidState { action: "rollback", .. })
            ));
        }
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (manager, _pool) = manager().await;
        assert!(matches!(
            manager.retry_job("nope").await,
            Err(ControlError::NotFound(_))
        ));
        assert!(matches!(
            manager.cancel_job("nope").await,
            Err(ControlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancel_without_running_job() {
        let (manager, pool) = manager().await;
        assert!(matches!(
            manager.cancel_current().await,
            Err(ControlError::NotRunning)
        ));
        let job = job_in(&pool, "a.mkv", JobStatus::Pending).await;
        assert!(matches!(
            manager.cancel_job(&job.id).await,
            Err(ControlError::InvalidState { action: "cancel", .. })
        ));
    }

    #[tokio::test]
    async fn pause_state_is_in_memory() {
        let (manager, _pool) = manager().await;
        assert!(!manager.is_paused());
        manager.pause(false).await;
        assert!(manager.is_paused());
        manager.resume();
        assert!(!manager.status().await.paused);
    }

    #[tokio::test]
    async fn paused_worker_leaves_queue_alone() {
        let pool = vidslim_db::connect(":memory:").await.unwrap();
        vidslim_db::migrate::run(&pool).await.unwrap();
        let settings = SettingsManager::with_settings(pool.clone(), RuntimeSettings::default());
        let manager = JobManager::with_poll_interval(
            pool.clone(),
            settings,
            LogBroadcaster::new(),
            true,
            Duration::from_millis(10),
        );
        let job = job_in(&pool, "a.mkv", JobStatus::Pending).await;

        manager.start().await;
        assert!(manager.is_running().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let still = jobs::get_job(&pool, &job.id).await.unwrap().unwrap();
        assert_eq!(still.status, JobStatus::Pending);

        manager.stop().await;
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn abandoned_job_fails_and_loses_partial_output() {
        let (manager, pool) = manager().await;
        let job = job_in(&pool, "a.mkv", JobStatus::Transcoding).await;
        let tmp = tempfile::tempdir().unwrap();
        let partial = tmp.path().join(format!("{}_a.mkv", job.id));
        std::fs::write(&partial, b"half").unwrap();

        abandon(&manager.inner, &job.id, &partial, "task panicked").await;

        assert!(!partial.exists());
        let job = jobs::get_job(&pool, &job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("unexpected error: task panicked"));
        let logs = job_logs::list_for_job(&pool, &job.id).await.unwrap();
        assert_eq!(logs.last().unwrap().level, LogLevel::Error);
    }

    #[test]
    fn processing_path_uses_job_id_and_stem() {
        let settings = RuntimeSettings::default();
        let job = JobRow {
            id: "abc".into(),
            source_path: "/source/Movies/Film (2020).mp4".into(),
            relative_path: "Movies/Film (2020).mp4".into(),
            status: JobStatus::Pending,
            original_size: 0,
            new_size: 0,
            original_duration: 0.0,
            new_duration: 0.0,
            installed_path: None,
            disposed_path: None,
            error: None,
            created_ts: 0,
            updated_ts: 0,
        };
        assert_eq!(
            processing_path(&settings, &job),
            PathBuf::from("/temp/processing/abc_Film (2020).mkv")
        );
        assert_eq!(
            installed_path_for(Path::new(&job.source_path)),
            PathBuf::from("/source/Movies/Film (2020).mkv")
        );
    }
}
