use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Idle,
    RemovingIgnored,
    ListingFiles,
    CheckingMetadata,
    CreatingJobs,
}

/// Point-in-time view of the running (or last) scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub is_scanning: bool,
    pub phase: ScanPhase,
    pub current_file: String,
    pub files_checked: u64,
    pub files_found: u64,
    pub jobs_created: u64,
    pub jobs_removed: u64,
}

/// Shared, in-memory scan progress. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct ScanProgressTracker {
    inner: Arc<Mutex<ScanProgress>>,
}

impl ScanProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset counters and mark a scan as running. Returns `false` if one
    /// already is, leaving its state alone.
    pub async fn try_start(&self) -> bool {
        let mut p = self.inner.lock().await;
        if p.is_scanning {
            return false;
        }
        *p = ScanProgress {
            is_scanning: true,
            phase: ScanPhase::RemovingIgnored,
            ..ScanProgress::default()
        };
        true
    }

    pub async fn set_phase(&self, phase: ScanPhase) {
        self.inner.lock().await.phase = phase;
    }

    pub async fn set_current_file(&self, file: &str) {
        let mut p = self.inner.lock().await;
        p.current_file.clear();
        p.current_file.push_str(file);
    }

    pub async fn increment_checked(&self) {
        self.inner.lock().await.files_checked += 1;
    }

    pub async fn increment_found(&self) {
        self.inner.lock().await.files_found += 1;
    }

    pub async fn set_jobs_created(&self, count: u64) {
        self.inner.lock().await.jobs_created = count;
    }

    pub async fn set_jobs_removed(&self, count: u64) {
        self.inner.lock().await.jobs_removed = count;
    }

    /// Back to idle. Counters stay readable until the next start.
    pub async fn finish(&self) {
        let mut p = self.inner.lock().await;
        p.is_scanning = false;
        p.phase = ScanPhase::Idle;
        p.current_file.clear();
    }

    pub async fn snapshot(&self) -> ScanProgress {
        self.inner.lock().await.clone()
    }

    pub async fn is_scanning(&self) -> bool {
        self.inner.lock().await.is_scanning
    }
}
