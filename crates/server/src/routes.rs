use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vidslim_core::config::PERSISTED_KEYS;
use vidslim_core::error::ApiError;
use vidslim_core::types::JobStatus;
use vidslim_db::repo::job_logs::{self, JobLogRow};
use vidslim_db::repo::jobs::{self, JobRow};
use vidslim_db::repo::stats;
use vidslim_scanner::ScanReport;
use vidslim_scanner::progress::ScanProgress;
use vidslim_scanner::scan::preview_ignored;

use crate::error::AppError;
use crate::manager::{self, JobProgress, WorkerStatus};
use crate::state::AppState;
use crate::trash::{self, EmptyReport, TrashEntry};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        // Jobs
        .route("/jobs", get(list_jobs))
        .route("/jobs/stats", get(job_stats))
        .route("/jobs/progress", get(job_progress))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/logs", get(get_job_logs))
        .route("/jobs/{id}/logs/stream", get(stream_job_logs))
        .route("/jobs/{id}/retry", post(retry_job))
        .route("/jobs/{id}/rollback", post(rollback_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        // Scanning
        .route("/scan", post(trigger_scan))
        .route("/scan/progress", get(scan_progress))
        .route("/scan/preview", post(preview_scan))
        // Worker
        .route("/worker", get(worker_status))
        .route("/worker/pause", post(pause_worker))
        .route("/worker/resume", post(resume_worker))
        .route("/worker/cancel", post(cancel_current))
        // Settings
        .route("/settings", get(get_settings).put(update_settings))
        .route(
            "/settings/command-preview",
            get(command_preview).post(command_preview_with),
        )
        // Trash
        .route("/trash", get(list_trash))
        .route("/trash/info", get(trash_info))
        .route("/trash/empty", post(empty_trash))
}

fn db_error(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("db error: {e}"))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("database check failed: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct JobListQuery {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobRow>,
    total: i64,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(q): Query<JobListQuery>,
) -> Result<Json<JobListResponse>, AppError> {
    let status = match q.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(|_| ApiError::BadRequest(format!("invalid status filter: {raw}")))?,
        ),
        None => None,
    };
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = q.offset.unwrap_or(0).max(0);

    let jobs = jobs::list_jobs(&state.db, status, limit, offset)
        .await
        .map_err(db_error)?;
    let total = jobs::count_jobs(&state.db, status)
        .await
        .map_err(db_error)?;

    Ok(Json(JobListResponse { jobs, total }))
}

#[derive(Debug, Default, Serialize)]
struct JobStats {
    total_saved_bytes: i64,
    total_processed_files: i64,
    pending: i64,
    in_progress: i64,
    completed: i64,
    failed: i64,
    by_status: BTreeMap<&'static str, i64>,
}

async fn job_stats(State(state): State<AppState>) -> Result<Json<JobStats>, AppError> {
    let totals = stats::get_stats(&state.db).await.map_err(db_error)?;
    let counts = jobs::count_by_status(&state.db)
        .await
        .map_err(db_error)?;

    let mut out = JobStats {
        total_saved_bytes: totals.total_saved_bytes,
        total_processed_files: totals.total_processed_files,
        ..JobStats::default()
    };
    for (status, count) in counts {
        match status {
            JobStatus::Pending => out.pending += count,
            JobStatus::Completed => out.completed += count,
            JobStatus::Failed => out.failed += count,
            s if s.is_in_progress() => out.in_progress += count,
            _ => {}
        }
        out.by_status.insert(status.as_str(), count);
    }
    Ok(Json(out))
}

async fn job_progress(State(state): State<AppState>) -> Json<Option<JobProgress>> {
    Json(state.manager.current_progress().await)
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRow>, AppError> {
    let job = jobs::get_job(&state.db, &id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::NotFound("job not found".into()))?;

    Ok(Json(job))
}

async fn require_job(state: &AppState, id: &str) -> Result<JobRow, AppError> {
    jobs::get_job(&state.db, id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::NotFound("job not found".into()).into())
}

async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<JobLogRow>>, AppError> {
    require_job(&state, &id).await?;
    let entries = job_logs::list_for_job(&state.db, &id)
        .await
        .map_err(db_error)?;
    Ok(Json(entries))
}

/// Stored entries first, then live ones as the worker writes them.
async fn stream_job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_job(&state, &id).await?;

    // Subscribe before reading history so nothing falls in between.
    let mut live = state.logs.subscribe(&id);
    let history = job_logs::list_for_job(&state.db, &id)
        .await
        .map_err(db_error)?;

    let stream = async_stream::stream! {
        let mut last_id = 0;
        for entry in history {
            last_id = entry.id;
            if let Ok(data) = serde_json::to_string(&entry) {
                yield Ok(Event::default().event("log").data(data));
            }
        }
        while let Some(entry) = live.recv().await {
            if entry.id <= last_id {
                continue;
            }
            last_id = entry.id;
            if let Ok(data) = serde_json::to_string(&entry) {
                yield Ok(Event::default().event("log").data(data));
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRow>, AppError> {
    Ok(Json(state.manager.retry_job(&id).await?))
}

async fn rollback_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRow>, AppError> {
    Ok(Json(state.manager.rollback_job(&id).await?))
}

#[derive(Serialize)]
struct CancelResponse {
    job_id: String,
    cancelled: bool,
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    state.manager.cancel_job(&id).await?;
    Ok(Json(CancelResponse {
        job_id: id,
        cancelled: true,
    }))
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ScanQuery {
    #[serde(default)]
    wait: bool,
}

#[derive(Serialize)]
struct ScanResponse {
    started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ScanReport>,
}

async fn trigger_scan(
    State(state): State<AppState>,
    Query(q): Query<ScanQuery>,
) -> Result<Json<ScanResponse>, AppError> {
    if state.scanner.progress().is_scanning().await {
        return Err(ApiError::Conflict("a scan is already running".into()).into());
    }
    let settings = state.settings.current().await;

    if q.wait {
        let report = state.scanner.scan(&settings).await?;
        if report.created > 0 {
            state.manager.wake();
        }
        return Ok(Json(ScanResponse {
            started: true,
            report: Some(report),
        }));
    }

    let scanner = state.scanner.clone();
    let manager = state.manager.clone();
    tokio::spawn(async move {
        match scanner.scan(&settings).await {
            Ok(report) if report.created > 0 => manager.wake(),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "background scan failed"),
        }
    });
    info!("scan started");

    Ok(Json(ScanResponse {
        started: true,
        report: None,
    }))
}

async fn scan_progress(State(state): State<AppState>) -> Json<ScanProgress> {
    Json(state.scanner.progress().snapshot().await)
}

#[derive(Deserialize)]
struct PreviewRequest {
    patterns: String,
}

#[derive(Serialize)]
struct PreviewResponse {
    ignored: Vec<String>,
    count: usize,
}

async fn preview_scan(
    State(state): State<AppState>,
    Json(body): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, AppError> {
    let settings = state.settings.current().await;
    let ignored = preview_ignored(&settings, &body.patterns).await?;
    Ok(Json(PreviewResponse {
        count: ignored.len(),
        ignored,
    }))
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn worker_status(State(state): State<AppState>) -> Json<WorkerStatus> {
    Json(state.manager.status().await)
}

#[derive(Deserialize)]
struct PauseQuery {
    #[serde(default)]
    immediate: bool,
}

async fn pause_worker(
    State(state): State<AppState>,
    Query(q): Query<PauseQuery>,
) -> Json<WorkerStatus> {
    state.manager.pause(q.immediate).await;
    Json(state.manager.status().await)
}

async fn resume_worker(State(state): State<AppState>) -> Json<WorkerStatus> {
    state.manager.resume();
    state.manager.wake();
    Json(state.manager.status().await)
}

async fn cancel_current(State(state): State<AppState>) -> Result<Json<CancelResponse>, AppError> {
    let job_id = state.manager.cancel_current().await?;
    Ok(Json(CancelResponse {
        job_id,
        cancelled: true,
    }))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

type SettingsMap = BTreeMap<String, String>;

fn settings_map(settings: &vidslim_core::config::RuntimeSettings) -> SettingsMap {
    PERSISTED_KEYS
        .iter()
        .filter_map(|key| settings.get(key).map(|v| (key.to_string(), v)))
        .collect()
}

/// Accept strings, numbers and booleans; `null` clears a value.
fn to_updates(
    body: serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(String, String)>, ApiError> {
    body.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                _ => {
                    return Err(ApiError::BadRequest(format!(
                        "{key}: expected a string, number or boolean"
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

async fn get_settings(State(state): State<AppState>) -> Json<SettingsMap> {
    let settings = state.settings.current().await;
    Json(settings_map(&settings))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<SettingsMap>, AppError> {
    let updates = to_updates(body)?;
    let settings = state.settings.update(&updates).await?;
    Ok(Json(settings_map(&settings)))
}

#[derive(Serialize)]
struct CommandPreview {
    command: String,
}

async fn command_preview(State(state): State<AppState>) -> Json<CommandPreview> {
    let settings = state.settings.current().await;
    let opts = manager::encode_options(&settings, None);
    Json(CommandPreview {
        command: vidslim_transcoder::command::command_preview(&settings.ffmpeg_path, &opts),
    })
}

/// Preview with unsaved overrides applied.
async fn command_preview_with(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<CommandPreview>, AppError> {
    let updates = to_updates(body)?;
    let settings = state.settings.preview(&updates).await?;
    let opts = manager::encode_options(&settings, None);
    Ok(Json(CommandPreview {
        command: vidslim_transcoder::command::command_preview(&settings.ffmpeg_path, &opts),
    }))
}

// ---------------------------------------------------------------------------
// Trash
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TrashListing {
    entries: Vec<TrashEntry>,
    total_size: u64,
    file_count: u64,
}

async fn list_trash(State(state): State<AppState>) -> Result<Json<TrashListing>, AppError> {
    let root = state.settings.current().await.trash_dir();
    let entries = trash::list(&root)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot read trash: {e}")))?;
    Ok(Json(TrashListing {
        total_size: entries.iter().map(|e| e.size).sum(),
        file_count: entries.len() as u64,
        entries,
    }))
}

async fn trash_info(State(state): State<AppState>) -> Result<Json<trash::TrashInfo>, AppError> {
    let root = state.settings.current().await.trash_dir();
    let info = trash::info(&root)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot read trash: {e}")))?;
    Ok(Json(info))
}

async fn empty_trash(State(state): State<AppState>) -> Result<Json<EmptyReport>, AppError> {
    let root = state.settings.current().await.trash_dir();
    let report = trash::empty(&root)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot empty trash: {e}")))?;
    Ok(Json(report))
}
