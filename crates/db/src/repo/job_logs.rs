use sqlx::SqlitePool;
use vidslim_core::types::LogLevel;

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobLogRow {
    pub id: i64,
    pub job_id: String,
    pub level: LogLevel,
    pub message: String,
    pub created_ts: i64,
}

pub async fn append(
    pool: &SqlitePool,
    job_id: &str,
    level: LogLevel,
    message: &str,
) -> Result<JobLogRow, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "INSERT INTO job_log (job_id, level, message, created_ts) VALUES (?, ?, ?, ?)",
    )
    .bind(job_id)
    .bind(level.as_str())
    .bind(message)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(JobLogRow {
        id: result.last_insert_rowid(),
        job_id: job_id.to_string(),
        level,
        message: message.to_string(),
        created_ts: now,
    })
}

/// All entries for a job in the order they were written.
pub async fn list_for_job(pool: &SqlitePool, job_id: &str) -> Result<Vec<JobLogRow>, sqlx::Error> {
    let rows: Vec<(i64, String, String, String, i64)> = sqlx::query_as(
        "SELECT id, job_id, level, message, created_ts FROM job_log WHERE job_id = ? ORDER BY id ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<JobLogRow, sqlx::Error> {
            Ok(JobLogRow {
                id: r.0,
                job_id: r.1,
                level: r.2.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                message: r.3,
                created_ts: r.4,
            })
        })
        .collect()
}

pub async fn clear_for_job(pool: &SqlitePool, job_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM job_log WHERE job_id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
