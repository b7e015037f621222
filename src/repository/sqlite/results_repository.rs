//! Analysis results and their broken links.
//!
//! `broken_links` is unique on (analysis_result_id, source_url, broken_url);
//! every write path upserts on that key so a pair is never stored twice.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::models::{AnalysisResult, BrokenLink, Finding, ReconcilePlan};

use super::{map_finding_status, parse_datetime};

pub struct ResultsRepository {
    pool: SqlitePool,
}

impl ResultsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the project's result, creating it on first use. Refreshes `last_updated`.
    pub async fn get_or_create(&self, project_id: i64) -> Result<AnalysisResult> {
        let row = sqlx::query(
            r#"
            INSERT INTO analysis_results (project_id, last_updated)
            VALUES (?, ?)
            ON CONFLICT(project_id) DO UPDATE SET last_updated = excluded.last_updated
            RETURNING id, project_id, last_updated
            "#,
        )
        .bind(project_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .context("Failed to get or create analysis result")?;

        Ok(row_to_result(&row))
    }

    pub async fn find_by_project(&self, project_id: i64) -> Result<Option<AnalysisResult>> {
        let row = sqlx::query(
            "SELECT id, project_id, last_updated FROM analysis_results WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch analysis result")?;

        Ok(row.as_ref().map(row_to_result))
    }

    /// Broken links of a result, ordered by (source_url, broken_url).
    pub async fn list_broken_links(&self, analysis_result_id: i64) -> Result<Vec<BrokenLink>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, analysis_result_id, source_url, broken_url,
                status, context, is_no_response, checked_at
            FROM broken_links
            WHERE analysis_result_id = ?
            ORDER BY source_url, broken_url
            "#,
        )
        .bind(analysis_result_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch broken links")?;

        Ok(rows.iter().map(row_to_broken_link).collect())
    }

    /// Apply a reconciliation plan atomically and touch `last_updated`.
    pub async fn apply(&self, analysis_result_id: i64, plan: &ReconcilePlan) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for finding in &plan.inserts {
            upsert_finding(&mut tx, analysis_result_id, finding, &now).await?;
        }

        for (id, finding) in &plan.updates {
            sqlx::query(
                r#"
                UPDATE broken_links
                SET status = ?, context = ?, is_no_response = ?, checked_at = ?
                WHERE id = ? AND analysis_result_id = ?
                "#,
            )
            .bind(finding.status.to_string())
            .bind(&finding.context)
            .bind(finding.is_no_response())
            .bind(&now)
            .bind(id)
            .bind(analysis_result_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update broken link")?;
        }

        for id in &plan.deletes {
            sqlx::query("DELETE FROM broken_links WHERE id = ? AND analysis_result_id = ?")
                .bind(id)
                .bind(analysis_result_id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete broken link")?;
        }

        sqlx::query("UPDATE analysis_results SET last_updated = ? WHERE id = ?")
            .bind(&now)
            .bind(analysis_result_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(
            "Reconciled result {}: {} inserted, {} updated, {} deleted, {} unchanged",
            analysis_result_id,
            plan.inserts.len(),
            plan.updates.len(),
            plan.deletes.len(),
            plan.unchanged
        );
        Ok(())
    }

    /// (broken links, of which no-response) currently stored for a result.
    pub async fn counts(&self, analysis_result_id: i64) -> Result<LinkCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN is_no_response != 0 THEN 1 ELSE 0 END) AS no_response
            FROM broken_links
            WHERE analysis_result_id = ?
            "#,
        )
        .bind(analysis_result_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count broken links")?;

        Ok(LinkCounts {
            broken: row.get::<i64, _>("total"),
            no_response: row.get::<Option<i64>, _>("no_response").unwrap_or(0),
        })
    }
}

async fn upsert_finding(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    analysis_result_id: i64,
    finding: &Finding,
    now: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO broken_links (
            analysis_result_id, source_url, broken_url,
            status, context, is_no_response, checked_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(analysis_result_id, source_url, broken_url) DO UPDATE SET
            status = excluded.status,
            context = excluded.context,
            is_no_response = excluded.is_no_response,
            checked_at = excluded.checked_at
        "#,
    )
    .bind(analysis_result_id)
    .bind(&finding.source_url)
    .bind(&finding.broken_url)
    .bind(finding.status.to_string())
    .bind(&finding.context)
    .bind(finding.is_no_response())
    .bind(now)
    .execute(&mut **tx)
    .await
    .context("Failed to insert broken link")?;

    Ok(())
}

fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> AnalysisResult {
    AnalysisResult {
        id: row.get("id"),
        project_id: row.get("project_id"),
        last_updated: parse_datetime(row.get("last_updated")),
    }
}

fn row_to_broken_link(row: &sqlx::sqlite::SqliteRow) -> BrokenLink {
    BrokenLink {
        id: row.get("id"),
        analysis_result_id: row.get("analysis_result_id"),
        source_url: row.get("source_url"),
        broken_url: row.get("broken_url"),
        status: map_finding_status(row.get("status")),
        context: row.get("context"),
        is_no_response: row.get::<i64, _>("is_no_response") != 0,
        checked_at: parse_datetime(row.get("checked_at")),
    }
}

/// Stored broken link totals for a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounts {
    pub broken: i64,
    pub no_response: i64,
}
