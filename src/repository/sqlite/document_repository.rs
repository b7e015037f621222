//! SQLite-backed content repository.
//!
//! The `projects` and `documents` tables are filled by the content pipeline; the
//! analyzer only reads them. The write helpers exist for seeding and tooling.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::models::Document;
use crate::error::AppError;
use crate::repository::DocumentSource;

pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_project(&self, project_id: i64, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO projects (id, name) VALUES (?, ?)")
            .bind(project_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to create project")?;

        tracing::debug!("Created project {} ({})", project_id, name);
        Ok(())
    }

    pub async fn insert_document(&self, project_id: i64, url: &str, raw_html: &str) -> Result<i64> {
        let id = sqlx::query("INSERT INTO documents (project_id, url, raw_html) VALUES (?, ?, ?)")
            .bind(project_id)
            .bind(url)
            .bind(raw_html)
            .execute(&self.pool)
            .await
            .context("Failed to insert document")?
            .last_insert_rowid();

        Ok(id)
    }

    /// Replace the markup of every stored copy of `url` in the project.
    pub async fn replace_html(&self, project_id: i64, url: &str, raw_html: &str) -> Result<u64> {
        let updated = sqlx::query("UPDATE documents SET raw_html = ? WHERE project_id = ? AND url = ?")
            .bind(raw_html)
            .bind(project_id)
            .bind(url)
            .execute(&self.pool)
            .await
            .context("Failed to update document")?
            .rows_affected();

        Ok(updated)
    }

    async fn project_exists(&self, project_id: i64) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to look up project")?;

        Ok(found.is_some())
    }
}

#[async_trait]
impl DocumentSource for DocumentRepository {
    async fn list_documents(&self, project_id: i64) -> Result<Vec<Document>> {
        if !self.project_exists(project_id).await? {
            return Err(AppError::ProjectNotFound(project_id).into());
        }

        let rows = sqlx::query("SELECT url, raw_html FROM documents WHERE project_id = ? ORDER BY id")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch documents")?;

        Ok(rows
            .into_iter()
            .map(|row| Document {
                url: row.get("url"),
                raw_html: row.get("raw_html"),
            })
            .collect())
    }
}
