use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use serde::Deserialize;

use crate::error::{AppError, Result};

/// Desktop Chrome user agent; some hosts reject obvious bot agents with 403.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const DEFAULT_DATABASE_URL: &str = "sqlite://broken_links.db?mode=rwc";

/// Upper bound for a single backoff wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Tuning for the link validator and the per-document worker pool.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CheckerSettings {
    /// Total probe attempts per URL on transport failure
    pub max_retries: u32,
    /// Seconds; the wait before attempt `n + 1` is `backoff_factor * 2^n`
    pub backoff_factor: f64,
    pub timeout_secs: u64,
    pub max_redirects: usize,
    /// Concurrent reference checks within one document
    pub concurrency: usize,
    pub user_agent: String,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 0.3,
            timeout_secs: 10,
            max_redirects: 10,
            concurrency: num_cpus::get().max(4),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CheckerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay to wait after the failed attempt with the given zero-based index,
    /// capped at [`MAX_BACKOFF`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor * 2f64.powf(f64::from(attempt));
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub checker: CheckerSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = CheckerSettings::default();
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            checker: CheckerSettings {
                max_retries: parse_var("LINKCHECK_MAX_RETRIES", defaults.max_retries)?,
                backoff_factor: check_backoff_factor(
                    "LINKCHECK_BACKOFF_FACTOR",
                    parse_var("LINKCHECK_BACKOFF_FACTOR", defaults.backoff_factor)?,
                )?,
                timeout_secs: parse_var("LINKCHECK_TIMEOUT_SECS", defaults.timeout_secs)?,
                max_redirects: parse_var("LINKCHECK_MAX_REDIRECTS", defaults.max_redirects)?,
                concurrency: parse_var("LINKCHECK_CONCURRENCY", defaults.concurrency)?.max(1),
                user_agent: env::var("LINKCHECK_USER_AGENT").unwrap_or(defaults.user_agent),
            },
        })
    }
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| AppError::config(key, e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Backoff factors must be finite and not negative.
fn check_backoff_factor(key: &'static str, factor: f64) -> Result<f64> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(AppError::config(
            key,
            format!("expected a finite, non-negative number of seconds, got {}", factor),
        ));
    }
    Ok(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = CheckerSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.timeout(), Duration::from_secs(10));
        assert!(settings.concurrency >= 4);
        assert!(settings.user_agent.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_backoff_is_exponential() {
        let settings = CheckerSettings::default();
        assert_eq!(settings.backoff(0), Duration::from_secs_f64(0.3));
        assert_eq!(settings.backoff(1), Duration::from_secs_f64(0.6));
        assert_eq!(settings.backoff(2), Duration::from_secs_f64(1.2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let settings = CheckerSettings {
            backoff_factor: 1e30,
            ..Default::default()
        };
        assert_eq!(settings.backoff(0), MAX_BACKOFF);

        let settings = CheckerSettings {
            backoff_factor: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(settings.backoff(2), MAX_BACKOFF);

        let settings = CheckerSettings {
            backoff_factor: 5.0,
            ..Default::default()
        };
        assert_eq!(settings.backoff(1), Duration::from_secs(10));
        assert_eq!(settings.backoff(10), MAX_BACKOFF);
    }

    #[test]
    fn test_backoff_never_negative() {
        for factor in [-1.0, f64::NAN, f64::NEG_INFINITY] {
            let settings = CheckerSettings {
                backoff_factor: factor,
                ..Default::default()
            };
            assert_eq!(settings.backoff(0), Duration::ZERO, "{}", factor);
        }
    }

    #[test]
    fn test_backoff_factor_must_be_finite_and_non_negative() {
        for bad in [f64::INFINITY, f64::NAN, -0.5] {
            let err = check_backoff_factor("LINKCHECK_BACKOFF_FACTOR", bad).unwrap_err();
            assert!(matches!(err, AppError::Config { key, .. } if key == "LINKCHECK_BACKOFF_FACTOR"));
        }
        assert_eq!(check_backoff_factor("LINKCHECK_BACKOFF_FACTOR", 0.0).unwrap(), 0.0);
        assert_eq!(check_backoff_factor("LINKCHECK_BACKOFF_FACTOR", 1e30).unwrap(), 1e30);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: CheckerSettings =
            serde_json::from_str(r#"{"max_retries": 5, "backoff_factor": 0.0}"#).unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.backoff(3), Duration::ZERO);
        assert_eq!(settings.timeout_secs, 10);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        std::env::set_var("LINKCHECK_TEST_ONLY_GARBAGE", "three");
        let err = parse_var::<u32>("LINKCHECK_TEST_ONLY_GARBAGE", 3).unwrap_err();
        assert!(matches!(err, AppError::Config { key, .. } if key == "LINKCHECK_TEST_ONLY_GARBAGE"));
        std::env::remove_var("LINKCHECK_TEST_ONLY_GARBAGE");
    }
}
