//! Link validation: classify a reference, probe it over HTTP, retry transport
//! failures with exponential backoff, and report a terminal outcome.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::config::CheckerSettings;
use crate::domain::models::FindingStatus;
use crate::error::TransportError;
use crate::extractor::{is_checkable, is_valid_absolute};
use crate::service::event_log::EventLog;

pub const SEO_WARNING_DETAIL: &str = "The link contains only '#' or is not a valid URL with '#'. This may not provide value for SEO purposes.";

const TIMEOUT_DETAIL: &str = "Request timed out";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    /// Status of the final response after redirects
    pub status: u16,
}

/// One network request against a URL.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, method: ProbeMethod, url: &str) -> Result<ProbeResponse, TransportError>;
}

/// `Prober` backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, method: ProbeMethod, url: &str) -> Result<ProbeResponse, TransportError> {
        let method = match method {
            ProbeMethod::Head => Method::HEAD,
            ProbeMethod::Get => Method::GET,
        };
        let response = self.client.request(method, url).send().await?;
        Ok(ProbeResponse {
            status: response.status().as_u16(),
        })
    }
}

/// Terminal result of checking one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Valid,
    /// Not eligible for a network check (asset, non-HTTP scheme, not absolute)
    Skipped,
    HttpError(u16),
    NoResponse(String),
    SeoWarning(String),
}

impl LinkOutcome {
    /// Status and detail text for outcomes that count as broken.
    pub fn finding(&self) -> Option<(FindingStatus, String)> {
        match self {
            LinkOutcome::Valid | LinkOutcome::Skipped => None,
            LinkOutcome::HttpError(code) => {
                Some((FindingStatus::Http(*code), format!("HTTP Error: {}", code)))
            }
            LinkOutcome::NoResponse(detail) => Some((FindingStatus::NoResponse, detail.clone())),
            LinkOutcome::SeoWarning(detail) => Some((FindingStatus::SeoWarning, detail.clone())),
        }
    }

    pub fn is_broken(&self) -> bool {
        self.finding().is_some()
    }
}

pub struct LinkValidator {
    prober: Arc<dyn Prober>,
    settings: CheckerSettings,
    log: Arc<dyn EventLog>,
}

impl LinkValidator {
    pub fn new(prober: Arc<dyn Prober>, settings: CheckerSettings, log: Arc<dyn EventLog>) -> Self {
        Self {
            prober,
            settings,
            log,
        }
    }

    pub fn settings(&self) -> &CheckerSettings {
        &self.settings
    }

    /// Check a reference. `raw` is the attribute value as written, `url` the
    /// value resolved against the document. Never fails.
    pub async fn check(&self, raw: &str, url: &str) -> LinkOutcome {
        let valid = is_valid_absolute(url);
        if raw == "#" || url == "#" || (!valid && url.contains('#')) {
            return LinkOutcome::SeoWarning(SEO_WARNING_DETAIL.to_string());
        }
        if !valid || !is_checkable(url) {
            return LinkOutcome::Skipped;
        }

        let attempts = self.settings.max_retries.max(1);
        let mut last_error = TransportError::Timeout;
        for attempt in 0..attempts {
            match self.probe_once(url).await {
                Ok(response) if response.status >= 400 => {
                    return LinkOutcome::HttpError(response.status)
                }
                Ok(_) => return LinkOutcome::Valid,
                Err(err) => {
                    self.log.debug(&format!(
                        "Probe {}/{} for {} failed: {}",
                        attempt + 1,
                        attempts,
                        url,
                        err
                    ));
                    last_error = err;
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.settings.backoff(attempt)).await;
                    }
                }
            }
        }

        self.log
            .warn(&format!("No response from {} after {} attempts", url, attempts));
        LinkOutcome::NoResponse(match last_error {
            TransportError::Timeout | TransportError::Tls(_) => TIMEOUT_DETAIL.to_string(),
            TransportError::Connection(detail) => format!("Connection error: {}", detail),
        })
    }

    /// HEAD, falling back to GET when the server answers 405.
    async fn probe_once(&self, url: &str) -> Result<ProbeResponse, TransportError> {
        let response = self.prober.probe(ProbeMethod::Head, url).await?;
        if response.status == 405 {
            return self.prober.probe(ProbeMethod::Get, url).await;
        }
        Ok(response)
    }
}
