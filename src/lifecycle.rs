//! Process lifecycle: logging setup and service wiring for the binary.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::repository::sqlite::DocumentRepository;
use crate::service::{BrokenLinkService, TokioTaskRunner};

/// Initialize logging with tracing_subscriber.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn"));

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .with_ansi(true)
        .try_init();
}

/// Build the service stack from configuration:
/// - Database connection pool (migrations applied)
/// - SQLite-backed document source
/// - In-process task runner
pub async fn setup(config: &Config) -> Result<BrokenLinkService> {
    let pool = db::init_db(&config.database_url).await?;
    let documents = Arc::new(DocumentRepository::new(pool.clone()));
    let runner = Arc::new(TokioTaskRunner::new());

    BrokenLinkService::new(pool, documents, runner, config.checker.clone())
}
