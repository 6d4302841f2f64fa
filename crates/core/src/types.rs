use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a conversion job, stored in the `job.status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    /// Reserved. The worker never enters this state; scans run out-of-band.
    Scanning,
    Transcoding,
    Verifying,
    Installing,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        Self::Pending,
        Self::Scanning,
        Self::Transcoding,
        Self::Verifying,
        Self::Installing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::RolledBack,
    ];

    /// Statuses a crashed process can leave behind.
    pub const IN_PROGRESS: [JobStatus; 4] = [
        Self::Scanning,
        Self::Transcoding,
        Self::Verifying,
        Self::Installing,
    ];

    /// Statuses from which a user may requeue a job.
    pub const RETRYABLE: [JobStatus; 3] = [Self::Failed, Self::Cancelled, Self::RolledBack];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scanning => "scanning",
            Self::Transcoding => "transcoding",
            Self::Verifying => "verifying",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_in_progress(self) -> bool {
        Self::IN_PROGRESS.contains(&self)
    }

    pub fn can_retry(self) -> bool {
        Self::RETRYABLE.contains(&self)
    }

    pub fn can_rollback(self) -> bool {
        self == Self::Completed
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// What happens to an original file once its replacement is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Trash,
    Archive,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trash => "trash",
            Self::Archive => "archive",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trash" => Ok(Self::Trash),
            "archive" => Ok(Self::Archive),
            other => Err(format!("unknown disposition strategy: {other}")),
        }
    }
}
