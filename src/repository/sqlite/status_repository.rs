//! Per-project analysis status row.
//!
//! Writes made on behalf of a run carry its task id and only apply while the
//! row is still analyzing for that task. Once a run is cancelled (or a newer
//! run has claimed the project) its late writes match no row and are dropped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::models::AnalysisStatus;

use super::{parse_optional_datetime, LinkCounts};

const SELECT_STATUS: &str = r#"
    SELECT
        project_id, is_analyzing, progress, total_links, broken_links,
        no_response_links, last_analysis, start_time, error_message, task_id
    FROM analysis_status
    WHERE project_id = ?
"#;

pub struct StatusRepository {
    pool: SqlitePool,
}

impl StatusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, project_id: i64) -> Result<Option<AnalysisStatus>> {
        let row = sqlx::query(SELECT_STATUS)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch analysis status")?;

        Ok(row.as_ref().map(row_to_status))
    }

    /// Status row for the project, inserting an idle one on first use.
    pub async fn get_or_create(&self, project_id: i64) -> Result<AnalysisStatus> {
        self.ensure_row(project_id).await?;
        Ok(self
            .get(project_id)
            .await?
            .unwrap_or_else(|| AnalysisStatus::idle(project_id)))
    }

    /// Move the project from idle to analyzing for `task_id`.
    ///
    /// Returns false, touching nothing, when a run is already in flight.
    pub async fn try_claim(&self, project_id: i64, task_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.ensure_row(project_id).await?;

        let claimed = sqlx::query(
            r#"
            UPDATE analysis_status
            SET is_analyzing = 1,
                progress = 0,
                total_links = 0,
                broken_links = 0,
                error_message = NULL,
                start_time = ?,
                task_id = ?
            WHERE project_id = ? AND is_analyzing = 0
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(task_id)
        .bind(project_id)
        .execute(&self.pool)
        .await
        .context("Failed to claim analysis")?
        .rows_affected();

        Ok(claimed == 1)
    }

    /// Add references found in a newly opened document to `total_links`.
    pub async fn add_discovered(&self, project_id: i64, task_id: &str, count: i64) -> Result<bool> {
        self.run_update(
            "UPDATE analysis_status SET total_links = total_links + ? \
             WHERE project_id = ? AND task_id = ? AND is_analyzing = 1",
            project_id,
            task_id,
            count,
        )
        .await
    }

    /// Add processed references to `progress`.
    pub async fn add_progress(&self, project_id: i64, task_id: &str, count: i64) -> Result<bool> {
        self.run_update(
            "UPDATE analysis_status SET progress = progress + ? \
             WHERE project_id = ? AND task_id = ? AND is_analyzing = 1",
            project_id,
            task_id,
            count,
        )
        .await
    }

    pub async fn complete(
        &self,
        project_id: i64,
        task_id: &str,
        counts: LinkCounts,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE analysis_status
            SET is_analyzing = 0,
                broken_links = ?,
                no_response_links = ?,
                last_analysis = ?,
                task_id = NULL
            WHERE project_id = ? AND task_id = ? AND is_analyzing = 1
            "#,
        )
        .bind(counts.broken)
        .bind(counts.no_response)
        .bind(now.to_rfc3339())
        .bind(project_id)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("Failed to complete analysis status")?
        .rows_affected();

        Ok(updated == 1)
    }

    pub async fn fail(&self, project_id: i64, task_id: &str, message: &str) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE analysis_status
            SET is_analyzing = 0, error_message = ?
            WHERE project_id = ? AND task_id = ? AND is_analyzing = 1
            "#,
        )
        .bind(message)
        .bind(project_id)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .context("Failed to record analysis failure")?
        .rows_affected();

        Ok(updated == 1)
    }

    /// Force the project out of analyzing. Returns false if it was not analyzing.
    pub async fn cancel(&self, project_id: i64, message: &str) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE analysis_status
            SET is_analyzing = 0, error_message = ?
            WHERE project_id = ? AND is_analyzing = 1
            "#,
        )
        .bind(message)
        .bind(project_id)
        .execute(&self.pool)
        .await
        .context("Failed to cancel analysis")?
        .rows_affected();

        Ok(updated == 1)
    }

    /// Zero the counters. `is_analyzing` and `error_message` are left as they are.
    pub async fn reset_counters(&self, project_id: i64) -> Result<()> {
        self.ensure_row(project_id).await?;

        sqlx::query(
            r#"
            UPDATE analysis_status
            SET progress = 0, total_links = 0, broken_links = 0, no_response_links = 0
            WHERE project_id = ?
            "#,
        )
        .bind(project_id)
        .execute(&self.pool)
        .await
        .context("Failed to reset analysis counters")?;

        Ok(())
    }

    async fn ensure_row(&self, project_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO analysis_status (project_id) VALUES (?) ON CONFLICT(project_id) DO NOTHING")
            .bind(project_id)
            .execute(&self.pool)
            .await
            .context("Failed to create analysis status")?;
        Ok(())
    }

    async fn run_update(&self, sql: &str, project_id: i64, task_id: &str, count: i64) -> Result<bool> {
        let updated = sqlx::query(sql)
            .bind(count)
            .bind(project_id)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .context("Failed to update analysis progress")?
            .rows_affected();

        if updated == 0 {
            tracing::debug!("Dropped progress write for project {} (task {} no longer active)", project_id, task_id);
        }
        Ok(updated == 1)
    }
}

fn row_to_status(row: &sqlx::sqlite::SqliteRow) -> AnalysisStatus {
    AnalysisStatus {
        project_id: row.get("project_id"),
        is_analyzing: row.get::<i64, _>("is_analyzing") != 0,
        progress: row.get("progress"),
        total_links: row.get("total_links"),
        broken_links: row.get("broken_links"),
        no_response_links: row.get("no_response_links"),
        last_analysis: parse_optional_datetime(row.get("last_analysis")),
        start_time: parse_optional_datetime(row.get("start_time")),
        error_message: row.get("error_message"),
        task_id: row.get("task_id"),
    }
}
