//! Persistence for sync runs and the incremental watermark
//!
//! One `sync_status` row per run, owned by the orchestrator that created
//! it: created as running, progress counters rewritten as pages complete,
//! finalized exactly once. The `search_config` key/value table carries the
//! `last_full_sync` watermark the next incremental run starts from.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{SyncJob, SyncMode, SyncStatus};

pub const LAST_FULL_SYNC_KEY: &str = "last_full_sync";

#[derive(Clone)]
pub struct SyncJobRepository {
    pool: Arc<SqlitePool>,
}

impl SyncJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the run row (status = running) and return its id.
    pub async fn create_job(&self, mode: SyncMode, params: &serde_json::Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO sync_status (id, sync_type, status, started_at, params)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(mode)
        .bind(SyncStatus::Running)
        .bind(Utc::now())
        .bind(params.to_string())
        .execute(&*self.pool)
        .await
        .context("failed to create sync job row")?;
        Ok(id)
    }

    /// Store the totals discovered by the page probe.
    pub async fn set_totals(&self, job_id: &str, total_pages: u32, total_records: u64) -> Result<()> {
        sqlx::query("UPDATE sync_status SET total_pages = ?, total_records = ? WHERE id = ?")
            .bind(i64::from(total_pages))
            .bind(total_records as i64)
            .bind(job_id)
            .execute(&*self.pool)
            .await
            .context("failed to store sync totals")?;
        Ok(())
    }

    /// Rewrite the cumulative progress counters.
    pub async fn update_progress(
        &self,
        job_id: &str,
        processed_pages: u32,
        processed_records: u64,
        new_records: u64,
        updated_records: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_status
            SET processed_pages = ?, processed_records = ?, new_records = ?, updated_records = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(processed_pages))
        .bind(processed_records as i64)
        .bind(new_records as i64)
        .bind(updated_records as i64)
        .bind(job_id)
        .execute(&*self.pool)
        .await
        .context("failed to write sync progress")?;
        Ok(())
    }

    /// Finalize to completed; `error_summary` carries the first few entries
    /// of the run's error list for partially successful runs.
    pub async fn complete_job(&self, job_id: &str, error_summary: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE sync_status SET status = ?, completed_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(SyncStatus::Completed)
        .bind(Utc::now())
        .bind(error_summary)
        .bind(job_id)
        .execute(&*self.pool)
        .await
        .context("failed to complete sync job")?;
        Ok(())
    }

    pub async fn fail_job(&self, job_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sync_status SET status = ?, completed_at = ?, error_message = ? WHERE id = ?",
        )
        .bind(SyncStatus::Failed)
        .bind(Utc::now())
        .bind(error_message)
        .bind(job_id)
        .execute(&*self.pool)
        .await
        .context("failed to mark sync job failed")?;
        Ok(())
    }

    /// Most recent run, for the progress/status view.
    pub async fn get_latest_job(&self) -> Result<Option<SyncJob>> {
        let job = sqlx::query_as::<_, SyncJob>(
            "SELECT * FROM sync_status ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&*self.pool)
        .await?;
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<SyncJob>> {
        let job = sqlx::query_as::<_, SyncJob>("SELECT * FROM sync_status WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(job)
    }

    /// Read the incremental watermark, if a successful run ever stored one.
    pub async fn get_last_full_sync(&self) -> Result<Option<NaiveDate>> {
        let row = sqlx::query("SELECT value FROM search_config WHERE key = ?")
            .bind(LAST_FULL_SYNC_KEY)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row
            .map(|row| row.get::<String, _>("value"))
            .and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok()))
    }

    pub async fn set_last_full_sync(&self, date: NaiveDate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO search_config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(LAST_FULL_SYNC_KEY)
        .bind(date.format("%Y-%m-%d").to_string())
        .execute(&*self.pool)
        .await
        .context("failed to store last_full_sync watermark")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use serde_json::json;
    use tempfile::tempdir;

    async fn test_repository() -> (tempfile::TempDir, SyncJobRepository) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("jobs.db").display());
        let db = DatabaseConnection::new(&url, 5).await.unwrap();
        db.migrate().await.unwrap();
        (dir, SyncJobRepository::new(db.pool().clone()))
    }

    #[tokio::test]
    async fn job_lifecycle_running_to_completed() {
        let (_dir, repo) = test_repository().await;
        let params = json!({"page_size": 200});

        let id = repo.create_job(SyncMode::Incremental, &params).await.unwrap();
        let job = repo.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, SyncStatus::Running);
        assert!(job.completed_at.is_none());

        repo.set_totals(&id, 12, 2400).await.unwrap();
        repo.update_progress(&id, 10, 1990, 1200, 790).await.unwrap();
        repo.complete_job(&id, None).await.unwrap();

        let job = repo.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, SyncStatus::Completed);
        assert_eq!(job.total_pages, 12);
        assert_eq!(job.total_records, 2400);
        assert_eq!(job.processed_records, 1990);
        assert_eq!(job.new_records, 1200);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_job_keeps_error_message() {
        let (_dir, repo) = test_repository().await;
        let id = repo
            .create_job(SyncMode::Full, &json!({}))
            .await
            .unwrap();
        repo.fail_job(&id, "probe fetch failed").await.unwrap();

        let job = repo.get_latest_job().await.unwrap().unwrap();
        assert_eq!(job.status, SyncStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("probe fetch failed"));
    }

    #[tokio::test]
    async fn watermark_round_trips_and_overwrites() {
        let (_dir, repo) = test_repository().await;
        assert!(repo.get_last_full_sync().await.unwrap().is_none());

        let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        repo.set_last_full_sync(first).await.unwrap();
        assert_eq!(repo.get_last_full_sync().await.unwrap(), Some(first));

        let second = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        repo.set_last_full_sync(second).await.unwrap();
        assert_eq!(repo.get_last_full_sync().await.unwrap(), Some(second));
    }
}
