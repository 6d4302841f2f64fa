//! End-to-end worker runs against shell stand-ins for ffmpeg and ffprobe.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::SqlitePool;
use vidslim_core::config::RuntimeSettings;
use vidslim_core::types::JobStatus;
use vidslim_db::repo::jobs::JobRow;
use vidslim_db::repo::{job_logs, jobs, stats};
use vidslim_scanner::Scanner;
use vidslim_scanner::progress::ScanProgressTracker;
use vidslim_server::logs::LogBroadcaster;
use vidslim_server::manager::JobManager;
use vidslim_server::settings::SettingsManager;

/// Reports 120.0s for sources and 120.1s for anything in the processing dir.
const FFPROBE: &str = r#"for last; do :; done
case "$last" in
  */processing/*) d=120.1 ;;
  *) d=120.0 ;;
esac
echo "{\"format\":{\"format_name\":\"matroska\",\"duration\":\"$d\"},\"streams\":[{\"index\":0,\"codec_type\":\"video\",\"codec_name\":\"h264\",\"width\":1920,\"height\":1080}]}""#;

/// Writes 400,000 bytes to the output and reports progress.
const FFMPEG_OK: &str = r#"for last; do :; done
head -c 400000 /dev/zero > "$last"
printf 'fps=48\nspeed=2.0x\nout_time_us=60000000\nprogress=continue\n'
printf 'out_time_us=120000000\nprogress=end\n'"#;

/// Starts writing, then hangs until killed.
const FFMPEG_SLOW: &str = r#"for last; do :; done
echo partial > "$last"
printf 'fps=10\nspeed=0.5x\nout_time_us=1000000\nprogress=continue\n'
exec sleep 30"#;

struct Fixture {
    _tmp: tempfile::TempDir,
    pool: SqlitePool,
    settings: RuntimeSettings,
    manager: JobManager,
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn fixture(ffmpeg_body: &str) -> Fixture {
    fixture_with(ffmpeg_body, |_| {}).await
}

async fn fixture_with(ffmpeg_body: &str, tweak: impl FnOnce(&mut RuntimeSettings)) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    let mut settings = RuntimeSettings {
        source_dir: root.join("source"),
        temp_dir: root.join("temp"),
        config_dir: root.join("config"),
        ffmpeg_path: script(root, "ffmpeg", ffmpeg_body),
        ffprobe_path: script(root, "ffprobe", FFPROBE),
        ..RuntimeSettings::default()
    };
    tweak(&mut settings);

    let pool = vidslim_db::connect(&settings.db_path().to_string_lossy())
        .await
        .unwrap();
    vidslim_db::migrate::run(&pool).await.unwrap();

    let manager = JobManager::with_poll_interval(
        pool.clone(),
        SettingsManager::with_settings(pool.clone(), settings.clone()),
        LogBroadcaster::new(),
        false,
        Duration::from_millis(20),
    );

    Fixture {
        _tmp: tmp,
        pool,
        settings,
        manager,
    }
}

async fn scan_one(fx: &Fixture, relative: &str, size: usize) -> JobRow {
    let path = fx.settings.source_dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, vec![7u8; size]).unwrap();

    let scanner = Scanner::new(fx.pool.clone(), ScanProgressTracker::new());
    assert_eq!(scanner.scan(&fx.settings).await.unwrap().created, 1);
    jobs::next_pending(&fx.pool).await.unwrap().unwrap()
}

async fn wait_for(pool: &SqlitePool, id: &str, pred: impl Fn(&JobRow) -> bool) -> JobRow {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let job = jobs::get_job(pool, id).await.unwrap().unwrap();
        if pred(&job) {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting; job is {}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn job_completes_and_rolls_back() {
    let fx = fixture(FFMPEG_OK).await;
    let job = scan_one(&fx, "Movies/film.mp4", 1_000_000).await;
    let source = fx.settings.source_dir.join("Movies/film.mp4");
    let installed = fx.settings.source_dir.join("Movies/film.mkv");
    let disposed = fx.settings.trash_dir().join("Movies/film.mp4");

    fx.manager.start().await;
    let done = wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Completed).await;
    fx.manager.stop().await;

    assert_eq!(done.new_size, 400_000);
    assert_eq!(done.original_duration, 120.0);
    assert!((done.new_duration - 120.1).abs() < 1e-9);
    assert_eq!(done.installed_path.as_deref(), Some(&*installed.to_string_lossy()));
    assert_eq!(done.disposed_path.as_deref(), Some(&*disposed.to_string_lossy()));

    assert!(!source.exists());
    assert_eq!(std::fs::metadata(&installed).unwrap().len(), 400_000);
    assert_eq!(std::fs::metadata(&disposed).unwrap().len(), 1_000_000);
    assert_eq!(
        std::fs::read_dir(fx.settings.processing_dir()).unwrap().count(),
        0
    );

    let totals = stats::get_stats(&fx.pool).await.unwrap();
    assert_eq!(totals.total_saved_bytes, 600_000);
    assert_eq!(totals.total_processed_files, 1);

    let logs = job_logs::list_for_job(&fx.pool, &job.id).await.unwrap();
    assert!(logs.iter().any(|l| l.message.starts_with("Command: ")));
    assert!(logs.last().unwrap().message.contains("saved 600000 bytes (60.0%)"));

    let rolled = fx.manager.rollback_job(&job.id).await.unwrap();
    assert_eq!(rolled.status, JobStatus::RolledBack);
    assert!(!installed.exists());
    assert!(!disposed.exists());
    assert_eq!(std::fs::metadata(&source).unwrap().len(), 1_000_000);

    let totals = stats::get_stats(&fx.pool).await.unwrap();
    assert_eq!(totals.total_saved_bytes, 0);
    assert_eq!(totals.total_processed_files, 0);

    let retried = fx.manager.retry_job(&job.id).await.unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
}

#[tokio::test]
async fn resolution_cap_reaches_the_encoder() {
    let fx = fixture_with(FFMPEG_OK, |s| s.max_long_side = 1280).await;
    let job = scan_one(&fx, "big.mkv", 1_000_000).await;

    fx.manager.start().await;
    wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Completed).await;
    fx.manager.stop().await;

    let logs = job_logs::list_for_job(&fx.pool, &job.id).await.unwrap();
    assert!(logs.iter().any(|l| l.message == "Scaling 1920x1080 to 1280x720"));
    let command = logs
        .iter()
        .find(|l| l.message.starts_with("Command: "))
        .unwrap();
    assert!(
        command.message.contains("-vf scale=1280:720"),
        "unexpected command: {}",
        command.message
    );
}

#[tokio::test]
async fn uncapped_encode_has_no_scale_filter() {
    let fx = fixture(FFMPEG_OK).await;
    let job = scan_one(&fx, "big.mkv", 1_000_000).await;

    fx.manager.start().await;
    wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Completed).await;
    fx.manager.stop().await;

    let logs = job_logs::list_for_job(&fx.pool, &job.id).await.unwrap();
    assert!(!logs.iter().any(|l| l.message.contains("scale=")));
}

#[tokio::test]
async fn immediate_pause_requeues_running_job() {
    let fx = fixture(FFMPEG_SLOW).await;
    let job = scan_one(&fx, "show.mkv", 50_000).await;
    let partial = fx
        .settings
        .processing_dir()
        .join(format!("{}_show.mkv", job.id));

    fx.manager.start().await;
    wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Transcoding).await;

    // Wait for the encoder to get going so there is something to clean up.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !partial.exists() {
        assert!(tokio::time::Instant::now() < deadline, "encoder never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fx.manager.pause(true).await;
    let requeued = wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Pending).await;
    assert!(requeued.error.is_none());
    assert!(!partial.exists());

    // Paused: the job stays queued and the source is untouched.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let still = jobs::get_job(&fx.pool, &job.id).await.unwrap().unwrap();
    assert_eq!(still.status, JobStatus::Pending);
    assert!(fx.settings.source_dir.join("show.mkv").exists());
    assert!(fx.manager.current_progress().await.is_none());

    let logs = job_logs::list_for_job(&fx.pool, &job.id).await.unwrap();
    assert!(logs.iter().any(|l| l.message.contains("cancelled")));

    fx.manager.stop().await;
}

#[tokio::test]
async fn stop_requeues_running_job() {
    let fx = fixture(FFMPEG_SLOW).await;
    let job = scan_one(&fx, "show.mkv", 50_000).await;

    fx.manager.start().await;
    wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Transcoding).await;
    tokio::time::timeout(Duration::from_secs(10), fx.manager.stop())
        .await
        .expect("stop should not hang");

    let job = jobs::get_job(&fx.pool, &job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn verification_failure_marks_job_failed() {
    // Output far below the minimum size.
    let fx = fixture("for last; do :; done\necho tiny > \"$last\"").await;
    let job = scan_one(&fx, "clip.mkv", 50_000).await;

    fx.manager.start().await;
    let failed = wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Failed).await;
    fx.manager.stop().await;

    let error = failed.error.unwrap();
    assert!(error.contains("too small"), "unexpected error: {error}");
    assert!(fx.settings.source_dir.join("clip.mkv").exists());
    assert_eq!(
        std::fs::read_dir(fx.settings.processing_dir()).unwrap().count(),
        0
    );
    assert_eq!(stats::get_stats(&fx.pool).await.unwrap().total_processed_files, 0);
}

#[tokio::test]
async fn encoder_failure_marks_job_failed() {
    let fx = fixture("echo 'unsupported codec' >&2\nexit 1").await;
    let job = scan_one(&fx, "clip.mkv", 50_000).await;

    fx.manager.start().await;
    let failed = wait_for(&fx.pool, &job.id, |j| j.status == JobStatus::Failed).await;
    fx.manager.stop().await;

    let error = failed.error.unwrap();
    assert!(error.starts_with("transcode failed"), "unexpected error: {error}");
    let logs = job_logs::list_for_job(&fx.pool, &job.id).await.unwrap();
    assert_eq!(logs.last().unwrap().message, error);
}
