use anyhow::{Context, Result};
use reqwest::{redirect, Client};

use crate::config::CheckerSettings;

/// Build the HTTP client used for link probes.
///
/// Redirects are followed up to `max_redirects`; the per-request timeout and
/// User-Agent come from the checker settings.
pub fn create_client(settings: &CheckerSettings) -> Result<Client> {
    Client::builder()
        .timeout(settings.timeout())
        .redirect(redirect::Policy::limited(settings.max_redirects))
        .user_agent(settings.user_agent.as_str())
        .build()
        .context("Failed to build link checking client")
}
