//! Broken link analysis orchestration.
//!
//! A run walks every stored document of a project, checks its references,
//! collects findings in memory and reconciles them with the stored broken
//! links once all documents are done. Status counters are written after each
//! document so readers can follow progress.

mod reconcile;
mod reporter;

pub use crate::domain::models::ReconcilePlan;
pub use reconcile::reconcile;
pub use reporter::{NoopProgress, ProgressSink};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{Document, Finding};
use crate::error::AppError;
use crate::extractor::{context_error, link_context, ExtractedLink, ParsedDocument};
use crate::repository::sqlite::{ResultsRepository, StatusRepository};
use crate::repository::DocumentSource;
use crate::service::event_log::EventLog;
use crate::service::validator::{LinkOutcome, LinkValidator};

/// Everything a single run needs besides the processor itself.
pub struct RunContext {
    pub project_id: i64,
    pub task_id: String,
    pub token: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub documents: usize,
    pub references: i64,
    pub broken_links: i64,
    pub no_response_links: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    Cancelled,
}

pub struct AnalysisProcessor {
    documents: Arc<dyn DocumentSource>,
    results: ResultsRepository,
    status: StatusRepository,
    validator: LinkValidator,
    log: Arc<dyn EventLog>,
}

impl AnalysisProcessor {
    pub fn new(
        pool: SqlitePool,
        documents: Arc<dyn DocumentSource>,
        validator: LinkValidator,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            documents,
            results: ResultsRepository::new(pool.clone()),
            status: StatusRepository::new(pool),
            validator,
            log,
        }
    }

    /// Run an analysis that has already been claimed for `ctx.task_id`.
    ///
    /// Failures are recorded on the status row before being returned.
    /// Cancellation is not an error.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunOutcome> {
        self.log.info(&format!(
            "Starting broken link analysis for project {} (task {})",
            ctx.project_id, ctx.task_id
        ));

        match self.execute(ctx).await {
            Ok(summary) => {
                self.log.info(&format!(
                    "Completed broken link analysis for project {}. Found {} broken links out of {} total links.",
                    ctx.project_id, summary.broken_links, summary.references
                ));
                Ok(RunOutcome::Completed(summary))
            }
            Err(e) if is_cancellation(&e) || ctx.token.is_cancelled() => {
                self.log
                    .info(&format!("Analysis for project {} cancelled", ctx.project_id));
                Ok(RunOutcome::Cancelled)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                self.log.error(&format!(
                    "Error during analysis for project {}: {}",
                    ctx.project_id, message
                ));
                if let Err(write_err) = self.status.fail(ctx.project_id, &ctx.task_id, &message).await {
                    self.log
                        .error(&format!("Failed to record analysis failure: {:#}", write_err));
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, ctx: &RunContext) -> Result<RunSummary> {
        let documents = self.documents.list_documents(ctx.project_id).await?;
        let result = self.results.get_or_create(ctx.project_id).await?;

        let mut outcomes: HashMap<String, LinkOutcome> = HashMap::new();
        let mut findings: Vec<Finding> = Vec::new();
        let mut summary = RunSummary {
            documents: documents.len(),
            ..Default::default()
        };
        let mut progress = 0i64;

        for document in &documents {
            ensure_active(&ctx.token)?;

            let links = extract_links(document);
            let count = links.len() as i64;
            summary.references += count;
            self.status
                .add_discovered(ctx.project_id, &ctx.task_id, count)
                .await?;

            self.check_links(&links, &mut outcomes, &ctx.token).await?;
            let document_outcomes: Vec<LinkOutcome> = links
                .iter()
                .map(|link| outcomes.get(&link.url).cloned().unwrap_or(LinkOutcome::Skipped))
                .collect();
            findings.extend(build_findings(document, &links, &document_outcomes));

            progress += count;
            self.status
                .add_progress(ctx.project_id, &ctx.task_id, count)
                .await?;
            ctx.progress.report(progress, summary.references);
        }

        ensure_active(&ctx.token)?;

        let existing = self.results.list_broken_links(result.id).await?;
        let plan = reconcile(&existing, &findings);
        self.log.debug(&format!(
            "Reconciling project {}: {} new, {} changed, {} fixed, {} unchanged",
            ctx.project_id,
            plan.inserts.len(),
            plan.updates.len(),
            plan.deletes.len(),
            plan.unchanged
        ));
        self.results.apply(result.id, &plan).await?;

        let counts = self.results.counts(result.id).await?;
        summary.broken_links = counts.broken;
        summary.no_response_links = counts.no_response;
        if !self
            .status
            .complete(ctx.project_id, &ctx.task_id, counts, Utc::now())
            .await?
        {
            self.log.warn(&format!(
                "Status for project {} changed while task {} was finishing",
                ctx.project_id, ctx.task_id
            ));
        }

        Ok(summary)
    }

    /// Check every URL of `links` not already in `outcomes`, in document order.
    async fn check_links(
        &self,
        links: &[ExtractedLink],
        outcomes: &mut HashMap<String, LinkOutcome>,
        token: &CancellationToken,
    ) -> Result<()> {
        // (raw, url) pairs owned by the stream
        let pending: Vec<(String, String)> = {
            let mut seen: HashSet<&str> = HashSet::new();
            links
                .iter()
                .filter(|link| !outcomes.contains_key(&link.url) && seen.insert(link.url.as_str()))
                .map(|link| (link.raw.clone(), link.url.clone()))
                .collect()
        };

        let validator = &self.validator;
        let checked: Vec<Option<(String, LinkOutcome)>> = stream::iter(pending)
            .map(|(raw, url)| async move {
                if token.is_cancelled() {
                    return None;
                }
                let outcome = validator.check(&raw, &url).await;
                Some((url, outcome))
            })
            .buffered(validator.settings().concurrency.max(1))
            .collect()
            .await;

        ensure_active(token)?;
        outcomes.extend(checked.into_iter().flatten());
        Ok(())
    }
}

fn ensure_active(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(AppError::Cancelled.into());
    }
    Ok(())
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<AppError>(), Some(AppError::Cancelled))
}

/// First pass: owned references of a document. The parsed tree is dropped
/// before returning so it never lives across an await.
fn extract_links(document: &Document) -> Vec<ExtractedLink> {
    ParsedDocument::parse(&document.raw_html, &document.url).links()
}

/// Second pass: re-parse the document and describe each broken reference.
/// `links` and `outcomes` are aligned with the references of the first pass.
fn build_findings(document: &Document, links: &[ExtractedLink], outcomes: &[LinkOutcome]) -> Vec<Finding> {
    if !outcomes.iter().any(LinkOutcome::is_broken) {
        return Vec::new();
    }

    let parsed = ParsedDocument::parse(&document.raw_html, &document.url);
    let mut references = parsed.references();
    let mut findings = Vec::new();

    for (link, outcome) in links.iter().zip(outcomes) {
        let reference = references.next();
        let Some((status, detail)) = outcome.finding() else {
            continue;
        };

        let context = match reference {
            Some(reference) if reference.url == link.url => link_context(reference.element),
            _ => context_error(format!("element for {} not found", link.raw)),
        };

        findings.push(Finding {
            source_url: document.url.clone(),
            broken_url: link.url.clone(),
            status,
            context: Some(format!("{}\n{}", context, detail)),
        });
    }

    findings
}
