//! Domain entities for broken link analysis

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

// ====== Enums ======

const SEO_WARNING: &str = "SEO Warning";
const NO_RESPONSE: &str = "No Response";

/// Why a reference was recorded as broken. Stored as text in `broken_links.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindingStatus {
    Http(u16),
    SeoWarning,
    NoResponse,
}

impl FindingStatus {
    pub fn is_no_response(&self) -> bool {
        matches!(self, FindingStatus::NoResponse)
    }

    pub fn category(&self) -> LinkCategory {
        match self {
            FindingStatus::Http(_) => LinkCategory::HttpError,
            FindingStatus::SeoWarning => LinkCategory::SeoWarning,
            FindingStatus::NoResponse => LinkCategory::NoResponse,
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingStatus::Http(code) => write!(f, "{}", code),
            FindingStatus::SeoWarning => f.write_str(SEO_WARNING),
            FindingStatus::NoResponse => f.write_str(NO_RESPONSE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown finding status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for FindingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SEO_WARNING => Ok(FindingStatus::SeoWarning),
            NO_RESPONSE => Ok(FindingStatus::NoResponse),
            code => code
                .parse::<u16>()
                .map(FindingStatus::Http)
                .map_err(|_| UnknownStatus(s.to_string())),
        }
    }
}

impl Serialize for FindingStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Report bucket a broken link is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkCategory {
    SeoWarning,
    NoResponse,
    HttpError,
}

// ====== Content repository ======

/// A stored HTML page of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub url: String,
    pub raw_html: String,
}

impl Document {
    pub fn new(url: impl Into<String>, raw_html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            raw_html: raw_html.into(),
        }
    }
}

// ====== Analysis results ======

/// A reference that failed validation during the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub source_url: String,
    pub broken_url: String,
    pub status: FindingStatus,
    pub context: Option<String>,
}

impl Finding {
    pub fn key(&self) -> (&str, &str) {
        (&self.source_url, &self.broken_url)
    }

    pub fn is_no_response(&self) -> bool {
        self.status.is_no_response()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub id: i64,
    pub project_id: i64,
    pub last_updated: DateTime<Utc>,
}

/// A persisted broken link, unique per (analysis result, source, target).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenLink {
    pub id: i64,
    pub analysis_result_id: i64,
    pub source_url: String,
    pub broken_url: String,
    pub status: FindingStatus,
    pub context: Option<String>,
    pub is_no_response: bool,
    pub checked_at: DateTime<Utc>,
}

impl BrokenLink {
    pub fn key(&self) -> (&str, &str) {
        (&self.source_url, &self.broken_url)
    }

    pub fn category(&self) -> LinkCategory {
        if self.is_no_response {
            LinkCategory::NoResponse
        } else {
            self.status.category()
        }
    }

    /// True when a new finding for the same pair would change the stored row.
    pub fn differs_from(&self, finding: &Finding) -> bool {
        self.status != finding.status
            || self.context != finding.context
            || self.is_no_response != finding.is_no_response()
    }
}

/// Writes that turn the stored broken links of a result into a new set.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcilePlan {
    pub inserts: Vec<Finding>,
    /// Stored row id and the values it should take
    pub updates: Vec<(i64, Finding)>,
    /// Stored row ids whose pair was not seen in this run
    pub deletes: Vec<i64>,
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

// ====== Status tracking ======

/// Per-project analysis state as stored in `analysis_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisStatus {
    pub project_id: i64,
    pub is_analyzing: bool,
    pub progress: i64,
    pub total_links: i64,
    pub broken_links: i64,
    pub no_response_links: i64,
    pub last_analysis: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub task_id: Option<String>,
}

impl AnalysisStatus {
    pub fn idle(project_id: i64) -> Self {
        Self {
            project_id,
            is_analyzing: false,
            progress: 0,
            total_links: 0,
            broken_links: 0,
            no_response_links: 0,
            last_analysis: None,
            start_time: None,
            error_message: None,
            task_id: None,
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let elapsed_secs = match (self.is_analyzing, self.start_time) {
            (true, Some(start)) => Some((now - start).num_seconds().max(0)),
            _ => None,
        };

        StatusSnapshot {
            is_analyzing: self.is_analyzing,
            progress: self.progress,
            total_links: self.total_links,
            broken_links: self.broken_links,
            no_response_links: self.no_response_links,
            last_analysis: self.last_analysis,
            start_time: self.start_time,
            elapsed_secs,
            error_message: self.error_message.clone(),
            task_id: self.task_id.clone(),
        }
    }
}

// ====== Service responses ======

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub is_analyzing: bool,
    pub progress: i64,
    pub total_links: i64,
    pub broken_links: i64,
    pub no_response_links: i64,
    pub last_analysis: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<i64>,
    pub error_message: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResponse {
    pub status: StartStatus,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelStatus {
    Cancelled,
    NotAnalyzing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelResponse {
    pub status: CancelStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsReport {
    pub broken_links: Vec<BrokenLink>,
    pub seo_warnings: usize,
    pub no_response: usize,
    pub http_errors: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ResultsReport {
    pub fn from_links(broken_links: Vec<BrokenLink>, last_updated: Option<DateTime<Utc>>) -> Self {
        let mut report = Self {
            broken_links: Vec::new(),
            seo_warnings: 0,
            no_response: 0,
            http_errors: 0,
            last_updated,
        };
        for link in &broken_links {
            match link.category() {
                LinkCategory::SeoWarning => report.seo_warnings += 1,
                LinkCategory::NoResponse => report.no_response += 1,
                LinkCategory::HttpError => report.http_errors += 1,
            }
        }
        report.broken_links = broken_links;
        report
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub message: String,
}
