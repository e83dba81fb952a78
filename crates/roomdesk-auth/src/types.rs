//! Session types.

use std::time::Duration;

use roomdesk_settings::AuthSettings;
use serde::{Deserialize, Serialize};

/// Auth freshness of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Token is valid.
    Active,
    /// A renewal call is in flight.
    Refreshing,
    /// Renewal failed; the logout countdown is running.
    Expired,
    /// Renewal failed too many times; a fresh login is required.
    Failed,
    /// No session.
    LoggedOut,
}

impl SessionStatus {
    /// Whether a fresh login is the only way forward.
    pub fn requires_login(self) -> bool {
        matches!(self, Self::Failed | Self::LoggedOut)
    }
}

/// Notification sent to subscribers on every status transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusChange {
    /// New status.
    pub status: SessionStatus,
    /// True when this transition completed a successful renewal.
    pub refreshed: bool,
    /// Access expiry (epoch ms) after the transition, if a session exists.
    pub expires_at: Option<i64>,
    /// Failure that caused the transition, if any.
    pub reason: Option<String>,
}

impl StatusChange {
    pub(crate) fn new(status: SessionStatus, expires_at: Option<i64>) -> Self {
        Self {
            status,
            refreshed: false,
            expires_at,
            reason: None,
        }
    }

    pub(crate) fn refreshed(mut self) -> Self {
        self.refreshed = true;
        self
    }

    pub(crate) fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Credential handed to [`TokenManager::login`](crate::TokenManager::login).
#[derive(Clone, Debug)]
pub struct Credential {
    /// Bearer token.
    pub access_token: String,
    /// Access expiry in epoch ms; read from the expiry source when absent.
    pub expires_at_ms: Option<i64>,
}

impl Credential {
    /// Credential with a known expiry.
    pub fn new(access_token: impl Into<String>, expires_at_ms: i64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at_ms: Some(expires_at_ms),
        }
    }

    /// Credential whose expiry must be read out of band.
    pub fn without_expiry(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at_ms: None,
        }
    }
}

/// Result of one successful renewal call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Renewal {
    /// Rotated token, when the endpoint issues a new one.
    pub access_token: Option<String>,
    /// New access expiry in epoch ms, when the endpoint reports one.
    pub expires_at_ms: Option<i64>,
}

/// Timing policy for the token manager.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    /// Renew this long before expiry.
    pub buffer_window: Duration,
    /// Consecutive failures before the session is failed.
    pub max_refresh_attempts: u32,
    /// Grace period between `Expired` and the forced logout.
    pub logout_countdown: Duration,
    /// Deadline for one renewal call.
    pub refresh_timeout: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::from_settings(&AuthSettings::default())
    }
}

impl TokenConfig {
    /// Build from the `auth` settings section.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self {
            buffer_window: Duration::from_millis(settings.buffer_window_ms),
            max_refresh_attempts: settings.max_refresh_attempts,
            logout_countdown: Duration::from_millis(settings.logout_countdown_ms),
            refresh_timeout: Duration::from_millis(settings.refresh_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = TokenConfig::default();
        assert_eq!(config.buffer_window, Duration::from_secs(60));
        assert_eq!(config.max_refresh_attempts, 3);
        assert_eq!(config.logout_countdown, Duration::from_secs(30));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::LoggedOut).unwrap();
        assert_eq!(json, "\"logged_out\"");
    }

    #[test]
    fn requires_login() {
        assert!(SessionStatus::Failed.requires_login());
        assert!(SessionStatus::LoggedOut.requires_login());
        assert!(!SessionStatus::Expired.requires_login());
    }
}
