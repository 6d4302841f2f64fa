use sqlx::{SqliteConnection, SqlitePool};

/// The single aggregate-stats row.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsRow {
    pub total_saved_bytes: i64,
    pub total_processed_files: i64,
    pub updated_ts: i64,
}

pub async fn get_stats(pool: &SqlitePool) -> Result<StatsRow, sqlx::Error> {
    let row: Option<(i64, i64, i64)> = sqlx::query_as(
        "SELECT total_saved_bytes, total_processed_files, updated_ts FROM processing_stats WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row
        .map(|r| StatsRow {
            total_saved_bytes: r.0,
            total_processed_files: r.1,
            updated_ts: r.2,
        })
        .unwrap_or_default())
}

/// Add `saved_bytes` and `files` (either may be negative) to the stats row.
/// Runs on the caller's connection so it commits with the job update.
pub(crate) async fn apply_delta(
    conn: &mut SqliteConnection,
    saved_bytes: i64,
    files: i64,
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO processing_stats (id, total_saved_bytes, total_processed_files, updated_ts) \
         VALUES (1, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
           total_saved_bytes = total_saved_bytes + excluded.total_saved_bytes, \
           total_processed_files = total_processed_files + excluded.total_processed_files, \
           updated_ts = excluded.updated_ts",
    )
    .bind(saved_bytes)
    .bind(files)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
