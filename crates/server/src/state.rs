use sqlx::SqlitePool;
use vidslim_scanner::Scanner;
use vidslim_scanner::progress::ScanProgressTracker;

use crate::logs::LogBroadcaster;
use crate::manager::JobManager;
use crate::settings::SettingsManager;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: SettingsManager,
    pub manager: JobManager,
    pub scanner: Scanner,
    pub logs: LogBroadcaster,
}

impl AppState {
    /// Wire up the services around `db`. The worker is not started.
    pub async fn new(db: SqlitePool, settings: SettingsManager) -> Self {
        let logs = LogBroadcaster::new();
        let start_paused = settings.current().await.start_paused;
        let manager = JobManager::new(db.clone(), settings.clone(), logs.clone(), start_paused);
        let scanner = Scanner::new(db.clone(), ScanProgressTracker::new());
        Self {
            db,
            settings,
            manager,
            scanner,
            logs,
        }
    }
}
