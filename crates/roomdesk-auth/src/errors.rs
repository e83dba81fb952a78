//! Auth error types.

use roomdesk_core::SyncError;

/// Errors from renewal, expiry lookup, and session lifecycle.
///
/// `Clone` because every caller joined to a single in-flight refresh
/// receives the same outcome.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The renewal or expiry request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The renewal endpoint answered with a non-success response.
    #[error("renewal rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },

    /// Neither the renewal response nor the expiry metadata carried an expiry.
    #[error("no access expiry available")]
    MissingExpiry,

    /// A renewal call exceeded its deadline.
    #[error("renewal timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured deadline.
        timeout_ms: u64,
    },

    /// There is no session; a fresh login is required.
    #[error("not logged in")]
    LoggedOut,

    /// Renewal failed too many times in a row; a fresh login is required.
    #[error("renewal failed {attempts} consecutive times")]
    Exhausted {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

impl AuthError {
    /// Whether the backend explicitly refused the credential.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rejected { status: 401 | 403, .. })
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        SyncError::Auth(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display() {
        let err = AuthError::Rejected {
            status: 401,
            message: "token revoked".to_string(),
        };
        assert_eq!(err.to_string(), "renewal rejected (401): token revoked");
        assert!(err.is_unauthorized());
    }

    #[test]
    fn server_error_is_not_unauthorized() {
        let err = AuthError::Rejected {
            status: 503,
            message: String::new(),
        };
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn converts_to_fatal_sync_error() {
        let err: SyncError = AuthError::Exhausted { attempts: 3 }.into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("3 consecutive"));
    }
}
