//! Decides which references are worth a network check.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

const SKIPPED_SCHEMES: [&str; 4] = ["data:", "mailto:", "tel:", "ftp:"];

fn asset_extension() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\.(svg|css|js|png|jpg|jpeg|gif|ico)$").expect("static asset pattern")
    })
}

/// False for static assets and non-HTTP schemes, true otherwise.
///
/// The extension test looks at the URL path when the string parses, so query
/// strings (`logo.png?v=2`) do not hide an asset.
pub fn is_checkable(url: &str) -> bool {
    if SKIPPED_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        return false;
    }

    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    !asset_extension().is_match(&path)
}

/// True iff `url` parses with a non-empty scheme and host.
pub fn is_valid_absolute(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            !parsed.scheme().is_empty() && parsed.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}
