//! Error types for the broken link analyzer.
//!
//! This module provides structured error handling with:
//! - `AppError`: Domain-specific errors for analysis operations
//! - `TransportError`: Failures of a single network probe (retried by the validator)
//! - `Result<T>`: Type alias for Results using AppError

use thiserror::Error;

// ============================================================================
// DOMAIN ERROR TYPE
// ============================================================================

/// Domain-specific errors for analysis operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// Project does not exist in the content repository
    #[error("Project not found: {0}")]
    ProjectNotFound(i64),

    /// Configuration value could not be parsed
    #[error("Invalid configuration for {key}: {message}")]
    Config { key: &'static str, message: String },

    /// Analysis was cancelled
    #[error("Analysis cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Create a configuration error
    pub fn config(key: &'static str, msg: impl Into<String>) -> Self {
        Self::Config {
            key,
            message: msg.into(),
        }
    }
}

/// Result type alias using AppError.
pub type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// TRANSPORT ERROR (NETWORK PROBES)
// ============================================================================

/// Failure of a single network probe.
///
/// The validator retries every variant; which one exhausted the retries decides
/// the wording of the resulting "No Response" finding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }

        // reqwest does not expose TLS failures as a kind, walk the source chain instead
        let mut chain = Vec::new();
        let mut source: Option<&dyn std::error::Error> = Some(&error);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        let detail = chain.join(": ");
        let lowered = detail.to_lowercase();
        if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
            Self::Tls(detail)
        } else {
            Self::Connection(detail)
        }
    }
}
