mod document_repository;
mod results_repository;
mod status_repository;

pub use document_repository::DocumentRepository;
pub use results_repository::{LinkCounts, ResultsRepository};
pub use status_repository::StatusRepository;

use chrono::Utc;

use crate::domain::models::FindingStatus;

fn parse_datetime(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_datetime(s: Option<String>) -> Option<chrono::DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn map_finding_status(s: &str) -> FindingStatus {
    s.parse().unwrap_or_else(|_| {
        tracing::warn!("Unrecognized broken link status '{}', treating as no response", s);
        FindingStatus::NoResponse
    })
}
