//! Credential renewal endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use roomdesk_core::Clock;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::AuthError;
use crate::expiry::parse_expiry_value;
use crate::types::Renewal;

/// Issues one renewal call for the current token.
#[async_trait]
pub trait RenewalClient: Send + Sync {
    /// Exchange `current_token` for a fresh expiry (and possibly a new token).
    async fn renew(&self, current_token: &str) -> Result<Renewal, AuthError>;
}

/// Renewal over HTTP.
///
/// `POST {url}` with the current token as bearer auth. The response body is
/// `{success, accessToken?, expiresAt? | expiresIn?}`, where `expiresAt` is
/// epoch seconds, epoch ms, or RFC 3339 and `expiresIn` is seconds from now.
#[derive(Clone, Debug)]
pub struct HttpRenewalClient {
    http: reqwest::Client,
    url: String,
    clock: Arc<dyn Clock>,
}

impl HttpRenewalClient {
    /// Create a client for the renewal endpoint at `url`.
    pub fn new(url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            clock,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewalResponse {
    #[serde(default)]
    success: bool,
    access_token: Option<String>,
    expires_at: Option<Value>,
    expires_in: Option<i64>,
    message: Option<String>,
}

impl RenewalResponse {
    fn expiry(&self, now_ms: i64) -> Option<i64> {
        let absolute = match &self.expires_at {
            Some(Value::Number(n)) => n.as_i64().and_then(|n| parse_expiry_value(&n.to_string())),
            Some(Value::String(s)) => parse_expiry_value(s),
            _ => None,
        };
        absolute.or_else(|| self.expires_in.map(|secs| now_ms + secs * 1000))
    }
}

#[async_trait]
impl RenewalClient for HttpRenewalClient {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn renew(&self, current_token: &str) -> Result<Renewal, AuthError> {
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(current_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected { status, message });
        }

        let body: RenewalResponse = resp.json().await?;
        if !body.success {
            return Err(AuthError::Rejected {
                status,
                message: body
                    .message
                    .unwrap_or_else(|| "renewal reported failure".to_string()),
            });
        }

        Ok(Renewal {
            expires_at_ms: body.expiry(self.clock.now_ms()),
            access_token: body.access_token,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
