use anyhow::Result;
use async_trait::async_trait;

use crate::domain::models::Document;

pub mod sqlite;

/// Read access to the content repository that owns projects and their pages.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// All stored documents of a project, in a stable order.
    ///
    /// Unknown projects fail with [`crate::error::AppError::ProjectNotFound`].
    async fn list_documents(&self, project_id: i64) -> Result<Vec<Document>>;
}
