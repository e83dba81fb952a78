//! Out-of-band access expiry.
//!
//! The backend publishes the session expiry as page metadata
//! (`<meta name="session-expires-at" content="...">`). It is read once at
//! login when the credential carries no expiry, and again after every
//! successful renewal.

use std::sync::LazyLock;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::errors::AuthError;

static META_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").expect("static pattern"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-z][a-z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("static pattern")
});

/// Epoch values below this are seconds; at or above, milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Parse an expiry value: epoch seconds, epoch milliseconds, or RFC 3339.
pub fn parse_expiry_value(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(if n < MILLIS_THRESHOLD { n * 1000 } else { n });
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Find `<meta name="{name}" content="...">` in `html` and parse its content.
pub fn parse_expiry_meta(html: &str, name: &str) -> Option<i64> {
    for tag in META_TAG.find_iter(html) {
        let mut meta_name = None;
        let mut content = None;
        for caps in ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
                Some("name") => meta_name = value,
                Some("content") => content = value,
                _ => {}
            }
        }
        if meta_name.is_some_and(|n| n.eq_ignore_ascii_case(name)) {
            return content.and_then(parse_expiry_value);
        }
    }
    None
}

/// Side channel that reports the current access expiry.
#[async_trait]
pub trait ExpirySource: Send + Sync {
    /// Current expiry in epoch ms, or `None` if not published.
    async fn read_expiry(&self) -> Result<Option<i64>, AuthError>;
}

/// Fetches a page and reads its expiry `<meta>` tag.
#[derive(Clone, Debug)]
pub struct HttpExpirySource {
    http: reqwest::Client,
    url: String,
    meta_name: String,
}

impl HttpExpirySource {
    /// Create a source reading `meta_name` from the page at `url`.
    pub fn new(url: impl Into<String>, meta_name: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            meta_name: meta_name.into(),
        }
    }
}

#[async_trait]
impl ExpirySource for HttpExpirySource {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn read_expiry(&self) -> Result<Option<i64>, AuthError> {
        let resp = self.http.get(&self.url).send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, message });
        }
        let html = resp.text().await?;
        let expiry = parse_expiry_meta(&html, &self.meta_name);
        debug!(found = expiry.is_some(), "read expiry metadata");
        Ok(expiry)
    }
}

/// Fixed expiry value, settable at runtime.
#[derive(Debug, Default)]
pub struct StaticExpirySource {
    value: Mutex<Option<i64>>,
}

impl StaticExpirySource {
    /// Source reporting `value`.
    pub fn new(value: Option<i64>) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    /// Replace the reported value.
    pub fn set(&self, value: Option<i64>) {
        *self.value.lock() = value;
    }
}

#[async_trait]
impl ExpirySource for StaticExpirySource {
    async fn read_expiry(&self) -> Result<Option<i64>, AuthError> {
        Ok(*self.value.lock())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_epoch_seconds_and_millis() {
        assert_eq!(parse_expiry_value("1700000000"), Some(1_700_000_000_000));
        assert_eq!(parse_expiry_value("1700000000123"), Some(1_700_000_000_123));
    }

    #[test]
    fn parses_rfc3339() {
        assert_eq!(
            parse_expiry_value("2023-11-14T22:13:20Z"),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_expiry_value(""), None);
        assert_eq!(parse_expiry_value("tomorrow"), None);
    }

    #[test]
    fn finds_meta_in_either_attribute_order() {
        let html = r#"<html><head>
            <meta charset="utf-8">
            <meta content="1700000000" name="session-expires-at">
        </head></html>"#;
        assert_eq!(
            parse_expiry_meta(html, "session-expires-at"),
            Some(1_700_000_000_000)
        );

        let html = "<meta name='session-expires-at' content='2023-11-14T22:13:20Z' />";
        assert_eq!(
            parse_expiry_meta(html, "session-expires-at"),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn missing_meta_is_none() {
        let html = r#"<meta name="csrf-token" content="abc">"#;
        assert_eq!(parse_expiry_meta(html, "session-expires-at"), None);
    }

    #[tokio::test]
    async fn static_source_is_settable() {
        let source = StaticExpirySource::new(None);
        assert_eq!(source.read_expiry().await.unwrap(), None);
        source.set(Some(42));
        assert_eq!(source.read_expiry().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn http_source_reads_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dashboard"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<head><meta name="session-expires-at" content="1700000000000"></head>"#,
            ))
            .mount(&server)
            .await;

        let source = HttpExpirySource::new(
            format!("{}/dashboard", server.uri()),
            "session-expires-at",
        );
        assert_eq!(source.read_expiry().await.unwrap(), Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn http_source_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let source = HttpExpirySource::new(server.uri(), "session-expires-at");
        let err = source.read_expiry().await.unwrap_err();
        assert!(err.is_unauthorized());
    }
}
