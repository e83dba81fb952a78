//! Token lifecycle settings.

use serde::{Deserialize, Serialize};

/// Renewal scheduling and endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Renew this long before the access token expires.
    pub buffer_window_ms: u64,
    /// Consecutive renewal failures before the session is failed.
    pub max_refresh_attempts: u32,
    /// Grace period between `expired` and the forced logout.
    pub logout_countdown_ms: u64,
    /// Deadline for a single renewal call.
    pub refresh_timeout_ms: u64,
    /// Credential-refresh endpoint.
    pub renewal_url: String,
    /// Page that carries the out-of-band expiry metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_page_url: Option<String>,
    /// `<meta name>` holding the access expiry.
    pub expiry_meta_name: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            buffer_window_ms: 60_000,
            max_refresh_attempts: 3,
            logout_countdown_ms: 30_000,
            refresh_timeout_ms: 10_000,
            renewal_url: "http://localhost:3000/api/auth/refresh".to_string(),
            expiry_page_url: None,
            expiry_meta_name: "session-expires-at".to_string(),
        }
    }
}
