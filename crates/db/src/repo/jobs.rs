use sqlx::SqlitePool;
use vidslim_core::types::JobStatus;

use crate::repo::stats;

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobRow {
    pub id: String,
    pub source_path: String,
    pub relative_path: String,
    pub status: JobStatus,
    pub original_size: i64,
    pub new_size: i64,
    pub original_duration: f64,
    pub new_duration: f64,
    pub installed_path: Option<String>,
    pub disposed_path: Option<String>,
    pub error: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
}

/// Result of a successful install, written together with the stats increment.
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub new_size: i64,
    pub new_duration: f64,
    pub installed_path: &'a str,
    pub disposed_path: &'a str,
}

const JOB_COLUMNS: &str = "id, source_path, relative_path, status, original_size, new_size, \
     original_duration, new_duration, installed_path, disposed_path, error, created_ts, updated_ts";

type RawJob = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    f64,
    f64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

/// Insert a pending job unless one already exists for `source_path`.
/// Returns `None` when the path is already tracked.
pub async fn create_job(
    pool: &SqlitePool,
    source_path: &str,
    relative_path: &str,
    original_size: i64,
) -> Result<Option<JobRow>, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query(
        "INSERT INTO job (id, source_path, relative_path, status, original_size, created_ts, updated_ts) \
         VALUES (?, ?, ?, 'pending', ?, ?, ?) ON CONFLICT(source_path) DO NOTHING",
    )
    .bind(&id)
    .bind(source_path)
    .bind(relative_path)
    .bind(original_size)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    Ok(Some(JobRow {
        id,
        source_path: source_path.to_string(),
        relative_path: relative_path.to_string(),
        status: JobStatus::Pending,
        original_size,
        new_size: 0,
        original_duration: 0.0,
        new_duration: 0.0,
        installed_path: None,
        disposed_path: None,
        error: None,
        created_ts: now,
        updated_ts: now,
    }))
}

pub async fn get_job(pool: &SqlitePool, job_id: &str) -> Result<Option<JobRow>, sqlx::Error> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM job WHERE id = ?");
    let row: Option<RawJob> = sqlx::query_as(&sql)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.map(row_to_job).transpose()
}

/// Every tracked source path, regardless of status.
pub async fn source_paths(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT source_path FROM job")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(p,)| p).collect())
}

/// Newest first, optionally filtered by status.
pub async fn list_jobs(
    pool: &SqlitePool,
    status: Option<JobStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<JobRow>, sqlx::Error> {
    let rows: Vec<RawJob> = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM job WHERE status = ? \
                 ORDER BY created_ts DESC, rowid DESC LIMIT ? OFFSET ?"
            );
            sqlx::query_as(&sql)
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM job ORDER BY created_ts DESC, rowid DESC LIMIT ? OFFSET ?"
            );
            sqlx::query_as(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(pool)
                .await?
        }
    };

    rows.into_iter().map(row_to_job).collect()
}

pub async fn count_jobs(pool: &SqlitePool, status: Option<JobStatus>) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = match status {
        Some(status) => {
            sqlx::query_as("SELECT COUNT(*) FROM job WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT COUNT(*) FROM job")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

/// Job counts grouped by status. Statuses with no jobs are omitted.
pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<(JobStatus, i64)>, sqlx::Error> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM job GROUP BY status")
            .fetch_all(pool)
            .await?;

    rows.into_iter()
        .map(|(status, count)| parse_status(&status).map(|s| (s, count)))
        .collect()
}

/// Jobs in any of `statuses`, oldest first.
pub async fn list_by_status(
    pool: &SqlitePool,
    statuses: &[JobStatus],
) -> Result<Vec<JobRow>, sqlx::Error> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM job WHERE status IN ({placeholders}) \
         ORDER BY created_ts ASC, rowid ASC"
    );
    let mut query = sqlx::query_as::<_, RawJob>(&sql);
    for status in statuses {
        query = query.bind(status.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    rows.into_iter().map(row_to_job).collect()
}

/// Oldest pending job by creation time; rowid breaks ties in insertion order.
pub async fn next_pending(pool: &SqlitePool) -> Result<Option<JobRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM job WHERE status = 'pending' \
         ORDER BY created_ts ASC, rowid ASC LIMIT 1"
    );
    let row: Option<RawJob> = sqlx::query_as(&sql).fetch_optional(pool).await?;

    row.map(row_to_job).transpose()
}

pub async fn set_status(
    pool: &SqlitePool,
    job_id: &str,
    status: JobStatus,
) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query("UPDATE job SET status = ?, updated_ts = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_original_duration(
    pool: &SqlitePool,
    job_id: &str,
    duration: f64,
) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query("UPDATE job SET original_duration = ?, updated_ts = ? WHERE id = ?")
        .bind(duration)
        .bind(now)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn mark_failed(pool: &SqlitePool, job_id: &str, error: &str) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let result =
        sqlx::query("UPDATE job SET status = 'failed', error = ?, updated_ts = ? WHERE id = ?")
            .bind(error)
            .bind(now)
            .bind(job_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Move a job from one of `from` to `to` in a single conditional update.
/// Returns false when the job does not exist or is in another status.
pub async fn transition(
    pool: &SqlitePool,
    job_id: &str,
    from: &[JobStatus],
    to: JobStatus,
    error: Option<&str>,
) -> Result<bool, sqlx::Error> {
    if from.is_empty() {
        return Ok(false);
    }
    let now = chrono::Utc::now().timestamp();
    let placeholders = vec!["?"; from.len()].join(", ");
    let sql = format!(
        "UPDATE job SET status = ?, error = ?, updated_ts = ? \
         WHERE id = ? AND status IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(error)
        .bind(now)
        .bind(job_id);
    for status in from {
        query = query.bind(status.as_str());
    }
    let result = query.execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Mark a job completed and credit its savings to the aggregate stats in one transaction.
pub async fn complete_job(
    pool: &SqlitePool,
    job_id: &str,
    completion: &Completion<'_>,
) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE job SET status = 'completed', new_size = ?, new_duration = ?, \
         installed_path = ?, disposed_path = ?, error = NULL, updated_ts = ? WHERE id = ?",
    )
    .bind(completion.new_size)
    .bind(completion.new_duration)
    .bind(completion.installed_path)
    .bind(completion.disposed_path)
    .bind(now)
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let (original_size,): (i64,) = sqlx::query_as("SELECT original_size FROM job WHERE id = ?")
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

    stats::apply_delta(&mut tx, original_size - completion.new_size, 1).await?;
    tx.commit().await?;
    Ok(true)
}

/// Flip a completed job to `rolled_back` and reverse its stats credit in one transaction.
/// Returns the bytes taken back off the stats, or `None` if the job was not completed.
pub async fn rollback_job(pool: &SqlitePool, job_id: &str) -> Result<Option<i64>, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let row: Option<(i64, i64)> = sqlx::query_as(
        "SELECT original_size, new_size FROM job WHERE id = ? AND status = 'completed'",
    )
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((original_size, new_size)) = row else {
        tx.rollback().await?;
        return Ok(None);
    };
    let saved = original_size - new_size;

    sqlx::query(
        "UPDATE job SET status = 'rolled_back', installed_path = NULL, disposed_path = NULL, \
         error = NULL, updated_ts = ? WHERE id = ?",
    )
    .bind(now)
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    stats::apply_delta(&mut tx, -saved, -1).await?;
    tx.commit().await?;
    Ok(Some(saved))
}

/// Remove a job, but only while it is still pending.
pub async fn delete_pending(pool: &SqlitePool, job_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM job WHERE id = ? AND status = 'pending'")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn parse_status(s: &str) -> Result<JobStatus, sqlx::Error> {
    s.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn row_to_job(r: RawJob) -> Result<JobRow, sqlx::Error> {
    Ok(JobRow {
        id: r.0,
        source_path: r.1,
        relative_path: r.2,
        status: parse_status(&r.3)?,
        original_size: r.4,
        new_size: r.5,
        original_duration: r.6,
        new_duration: r.7,
        installed_path: r.8,
        disposed_path: r.9,
        error: r.10,
        created_ts: r.11,
        updated_ts: r.12,
    })
}
