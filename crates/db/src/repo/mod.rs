pub mod job_logs;
pub mod jobs;
pub mod settings;
pub mod stats;
