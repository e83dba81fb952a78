//! What the consumer UI is shown.
//!
//! Everything beneath this surface is retried transparently. A signed-in
//! consumer only ever sees the link as live, reconnecting, or the session
//! as expired.

use std::fmt;

use roomdesk_auth::SessionStatus;
use roomdesk_realtime::ConnectionState;
use serde::Serialize;

/// Consumer-facing state of the sync core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    /// No session has been started, or the user logged out.
    SignedOut,
    /// Session active and realtime link up.
    Live,
    /// Session live but degraded: the realtime link is being re-established
    /// or a failed renewal is still being retried.
    Reconnecting,
    /// Re-authentication required.
    SessionExpired,
}

impl SurfaceState {
    /// Collapse session and connection state into the surface.
    ///
    /// `forced_out` marks a session that ended without the user asking. An
    /// `Expired` session still has renewal attempts and a countdown left, so
    /// it reads as reconnecting rather than expired.
    pub fn derive(session: SessionStatus, forced_out: bool, connection: ConnectionState) -> Self {
        match session {
            SessionStatus::Failed => Self::SessionExpired,
            SessionStatus::LoggedOut if forced_out => Self::SessionExpired,
            SessionStatus::LoggedOut => Self::SignedOut,
            SessionStatus::Expired => Self::Reconnecting,
            SessionStatus::Active | SessionStatus::Refreshing => match connection {
                ConnectionState::Connected => Self::Live,
                _ => Self::Reconnecting,
            },
        }
    }

    /// Whether the consumer must sign in again.
    pub fn requires_login(self) -> bool {
        matches!(self, Self::SignedOut | Self::SessionExpired)
    }
}

impl fmt::Display for SurfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SignedOut => "signed out",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::SessionExpired => "session expired",
        })
    }
}
