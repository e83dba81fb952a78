//! Token lifecycle manager.
//!
//! Owns the session: when the access token expires, when it is renewed, and
//! what subscribers hear about it.
//!
//! - A single renewal timer fires at `expires_at - buffer_window`. Re-arming
//!   aborts the previous timer.
//! - [`TokenManager::refresh`] is single-flight: concurrent callers join the
//!   in-flight renewal and receive the identical outcome.
//! - A failed renewal moves the session to `Expired` and starts the logout
//!   countdown; reaching `max_refresh_attempts` consecutive failures moves it
//!   to `Failed`.
//! - A renewal started by the timer retries immediately after each failure
//!   until it succeeds or the attempts run out. Callers joined to it receive
//!   the final outcome.
//!
//! Every state mutation happens under one lock; notifications are emitted
//! after the lock is released.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use roomdesk_core::clock::millis_until;
use roomdesk_core::{Clock, CredentialProvider, Subscribers, Subscription, SyncError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::AuthError;
use crate::expiry::ExpirySource;
use crate::renewal::RenewalClient;
use crate::types::{Credential, Renewal, SessionStatus, StatusChange, TokenConfig};

/// Outcome shared by every caller joined to one renewal.
pub type RefreshOutcome = Result<StatusChange, AuthError>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct Session {
    access_token: String,
    expires_at: i64,
}

struct SessionState {
    session: Option<Session>,
    status: SessionStatus,
    refresh_attempts: u32,
    /// Bumped on login and logout so late timer or renewal completions from
    /// an ended session are ignored.
    generation: u64,
    in_flight: Option<SharedRefresh>,
    renewal_timer: Option<JoinHandle<()>>,
    next_renewal_at: Option<i64>,
    countdown: Option<JoinHandle<()>>,
}

impl SessionState {
    fn expires_at(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.expires_at)
    }

    fn cancel_renewal_timer(&mut self) {
        if let Some(timer) = self.renewal_timer.take() {
            timer.abort();
        }
        self.next_renewal_at = None;
    }

    fn cancel_countdown(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.abort();
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.cancel_renewal_timer();
        self.cancel_countdown();
    }
}

struct PendingRefresh {
    tx: oneshot::Sender<RefreshOutcome>,
    token: String,
    attempt: u32,
    generation: u64,
    retry: bool,
}

/// What a finished renewal attempt leaves behind.
enum Settled {
    Done(RefreshOutcome),
    Retry { token: String, attempt: u32 },
}

struct Inner {
    config: TokenConfig,
    renewal: Arc<dyn RenewalClient>,
    expiry: Option<Arc<dyn ExpirySource>>,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
    subscribers: Subscribers<StatusChange>,
}

/// Handle to the process-wide session.
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("status", &self.status())
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Create a manager with no session.
    pub fn new(
        config: TokenConfig,
        renewal: Arc<dyn RenewalClient>,
        expiry: Option<Arc<dyn ExpirySource>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                renewal,
                expiry,
                clock,
                state: Mutex::new(SessionState {
                    session: None,
                    status: SessionStatus::LoggedOut,
                    refresh_attempts: 0,
                    generation: 0,
                    in_flight: None,
                    renewal_timer: None,
                    next_renewal_at: None,
                    countdown: None,
                }),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Start a session and arm proactive renewal.
    ///
    /// When the credential carries no expiry, the out-of-band expiry source
    /// is consulted. Replaces any existing session.
    #[tracing::instrument(skip_all)]
    pub async fn login(&self, credential: Credential) -> Result<StatusChange, AuthError> {
        let expires_at = match credential.expires_at_ms {
            Some(at) => at,
            None => self
                .inner
                .read_expiry()
                .await?
                .ok_or(AuthError::MissingExpiry)?,
        };

        let change = {
            let mut state = self.inner.state.lock();
            state.cancel_renewal_timer();
            state.cancel_countdown();
            state.generation += 1;
            state.in_flight = None;
            state.refresh_attempts = 0;
            state.session = Some(Session {
                access_token: credential.access_token,
                expires_at,
            });
            state.status = SessionStatus::Active;
            let fire_at = self.inner.arm_renewal(&mut state, expires_at);
            info!(expires_at, next_renewal_at = fire_at, "session started");
            StatusChange::new(SessionStatus::Active, Some(expires_at))
        };

        self.inner.subscribers.emit(&change);
        Ok(change)
    }

    /// End the session: clear it, cancel timers, notify `LoggedOut`.
    pub fn logout(&self) {
        if self.inner.end_session(None, None) {
            info!("session ended by logout");
        }
    }

    /// End the session because it can no longer be kept alive.
    pub fn force_logout(&self, reason: &str) {
        if self.inner.end_session(None, Some(reason.to_string())) {
            warn!(reason, "session forcibly ended");
        }
    }

    /// Re-arm the renewal timer from the current expiry.
    ///
    /// Returns the fire time (epoch ms), or `None` without a session.
    pub fn schedule_renewal(&self) -> Option<i64> {
        let mut state = self.inner.state.lock();
        let expires_at = state.expires_at()?;
        Some(self.inner.arm_renewal(&mut state, expires_at))
    }

    /// Renew the session, or join the renewal already in flight.
    ///
    /// Makes a single attempt; on failure the logout countdown stays in
    /// control.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.start_refresh(false).await
    }

    /// Start a renewal (or find the in-flight one) and return its shared
    /// outcome. With `retry`, failed attempts are repeated at once while
    /// attempts remain. Synchronous so the renewal timer can call it without
    /// the timer task's type depending on the renewal task's.
    fn start_refresh(&self, retry: bool) -> SharedRefresh {
        let (shared, started) = {
            let mut state = self.inner.state.lock();
            if let Some(in_flight) = &state.in_flight {
                debug!("joining in-flight renewal");
                (in_flight.clone(), None)
            } else {
                let Some(session) = &state.session else {
                    return ready(Err(AuthError::LoggedOut));
                };
                if state.status == SessionStatus::Failed {
                    return ready(Err(AuthError::Exhausted {
                        attempts: state.refresh_attempts,
                    }));
                }
                let token = session.access_token.clone();
                state.refresh_attempts += 1;
                state.status = SessionStatus::Refreshing;

                let (tx, rx) = oneshot::channel();
                let shared = async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(AuthError::Http("renewal task ended without a result".into()))
                    })
                }
                .boxed()
                .shared();
                state.in_flight = Some(shared.clone());

                let pending = PendingRefresh {
                    tx,
                    token,
                    attempt: state.refresh_attempts,
                    generation: state.generation,
                    retry,
                };
                let change = StatusChange::new(SessionStatus::Refreshing, state.expires_at());
                (shared, Some((pending, change)))
            }
        };

        if let Some((pending, change)) = started {
            self.inner.subscribers.emit(&change);
            let _ = tokio::spawn(Arc::clone(&self.inner).run_refresh(pending));
        }

        shared
    }

    /// Register a callback for every status transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback)
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    /// Access expiry in epoch ms.
    pub fn expires_at(&self) -> Option<i64> {
        self.inner.state.lock().expires_at()
    }

    /// When the armed renewal timer fires, in epoch ms.
    pub fn next_renewal_at(&self) -> Option<i64> {
        self.inner.state.lock().next_renewal_at
    }

    /// Consecutive failed renewals (including one in flight).
    pub fn refresh_attempts(&self) -> u32 {
        self.inner.state.lock().refresh_attempts
    }

    /// Current bearer token, if a session exists.
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.access_token.clone())
    }
}

#[async_trait]
impl CredentialProvider for TokenManager {
    async fn credential(&self) -> roomdesk_core::Result<String> {
        match self.status() {
            SessionStatus::Active => {}
            SessionStatus::Refreshing | SessionStatus::Expired => {
                let _ = self.refresh().await?;
            }
            SessionStatus::Failed => {
                return Err(AuthError::Exhausted {
                    attempts: self.refresh_attempts(),
                }
                .into());
            }
            SessionStatus::LoggedOut => return Err(AuthError::LoggedOut.into()),
        }
        self.access_token()
            .ok_or_else(|| SyncError::from(AuthError::LoggedOut))
    }
}

impl Inner {
    async fn read_expiry(&self) -> Result<Option<i64>, AuthError> {
        match &self.expiry {
            Some(source) => source.read_expiry().await,
            None => Ok(None),
        }
    }

    fn arm_renewal(self: &Arc<Self>, state: &mut SessionState, expires_at: i64) -> i64 {
        state.cancel_renewal_timer();

        let fire_at = expires_at.saturating_sub(duration_ms(self.config.buffer_window));
        let delay = Duration::from_millis(millis_until(self.clock.now_ms(), fire_at));
        let weak = Arc::downgrade(self);
        let generation = state.generation;

        state.next_renewal_at = Some(fire_at);
        state.renewal_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                debug!(generation, "renewal timer fired");
                let _ = TokenManager { inner }.start_refresh(true).await;
            }
        }));
        fire_at
    }

    fn start_countdown(self: &Arc<Self>, state: &mut SessionState) {
        if state.countdown.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let generation = state.generation;
        let countdown = self.config.logout_countdown;
        info!(countdown_ms = duration_ms(countdown), "logout countdown started");

        state.countdown = Some(tokio::spawn(async move {
            tokio::time::sleep(countdown).await;
            if let Some(inner) = weak.upgrade() {
                if inner.end_session(Some(generation), Some("session expired".to_string())) {
                    warn!("logout countdown elapsed; session forcibly ended");
                }
            }
        }));
    }

    async fn run_refresh(self: Arc<Self>, pending: PendingRefresh) {
        let PendingRefresh {
            tx,
            mut token,
            mut attempt,
            generation,
            retry,
        } = pending;

        let outcome = loop {
            debug!(attempt, "renewal attempt");
            let result = self.attempt_renewal(&token).await;
            let (settled, changes) = self.finish_refresh(result, generation, retry);
            for change in &changes {
                self.subscribers.emit(change);
            }
            match settled {
                Settled::Done(outcome) => break outcome,
                Settled::Retry {
                    token: next,
                    attempt: next_attempt,
                } => {
                    token = next;
                    attempt = next_attempt;
                }
            }
        };
        let _ = tx.send(outcome);
    }

    async fn attempt_renewal(&self, token: &str) -> Result<(Option<String>, i64), AuthError> {
        let timeout = self.config.refresh_timeout;
        match tokio::time::timeout(timeout, self.renewal.renew(token)).await {
            Ok(Ok(renewal)) => self.resolve_renewal(renewal).await,
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AuthError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Combine the renewal response with the out-of-band expiry; the later
    /// of the two wins.
    async fn resolve_renewal(&self, renewal: Renewal) -> Result<(Option<String>, i64), AuthError> {
        let published = self.read_expiry().await.unwrap_or_else(|err| {
            warn!(error = %err, "expiry metadata unavailable after renewal");
            None
        });
        let expires_at = renewal
            .expires_at_ms
            .into_iter()
            .chain(published)
            .max()
            .ok_or(AuthError::MissingExpiry)?;
        Ok((renewal.access_token, expires_at))
    }

    fn finish_refresh(
        self: &Arc<Self>,
        result: Result<(Option<String>, i64), AuthError>,
        generation: u64,
        retry: bool,
    ) -> (Settled, Vec<StatusChange>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!("discarding renewal result for an ended session");
            return (Settled::Done(Err(AuthError::LoggedOut)), Vec::new());
        }

        match result {
            Ok((token, expires_at)) => {
                if let Some(session) = state.session.as_mut() {
                    if let Some(token) = token {
                        session.access_token = token;
                    }
                    session.expires_at = expires_at;
                }
                state.in_flight = None;
                state.refresh_attempts = 0;
                state.status = SessionStatus::Active;
                state.cancel_countdown();
                let fire_at = self.arm_renewal(&mut state, expires_at);
                info!(expires_at, next_renewal_at = fire_at, "session renewed");

                let change = StatusChange::new(SessionStatus::Active, Some(expires_at)).refreshed();
                (Settled::Done(Ok(change.clone())), vec![change])
            }
            Err(err) => {
                let attempts = state.refresh_attempts;
                if attempts >= self.config.max_refresh_attempts {
                    state.in_flight = None;
                    state.status = SessionStatus::Failed;
                    state.cancel_renewal_timer();
                    warn!(attempts, error = %err, "renewal attempts exhausted");
                    let change = StatusChange::new(SessionStatus::Failed, state.expires_at())
                        .because(err.to_string());
                    return (Settled::Done(Err(AuthError::Exhausted { attempts })), vec![change]);
                }

                state.status = SessionStatus::Expired;
                self.start_countdown(&mut state);
                warn!(attempt = attempts, error = %err, "renewal failed");
                let expired = StatusChange::new(SessionStatus::Expired, state.expires_at())
                    .because(err.to_string());

                let token = state.session.as_ref().map(|s| s.access_token.clone());
                match token {
                    Some(token) if retry => {
                        // in_flight stays set so joiners wait for the retry.
                        state.refresh_attempts += 1;
                        state.status = SessionStatus::Refreshing;
                        let refreshing =
                            StatusChange::new(SessionStatus::Refreshing, state.expires_at());
                        let attempt = state.refresh_attempts;
                        (Settled::Retry { token, attempt }, vec![expired, refreshing])
                    }
                    _ => {
                        state.in_flight = None;
                        (Settled::Done(Err(err)), vec![expired])
                    }
                }
            }
        }
    }

    /// Clear the session. Returns false when there was nothing to clear or
    /// `generation` no longer matches.
    fn end_session(&self, generation: Option<u64>, reason: Option<String>) -> bool {
        let change = {
            let mut state = self.state.lock();
            if generation.is_some_and(|g| g != state.generation) {
                return false;
            }
            if state.session.is_none() && state.status == SessionStatus::LoggedOut {
                return false;
            }
            state.cancel_renewal_timer();
            state.cancel_countdown();
            state.generation += 1;
            state.in_flight = None;
            state.session = None;
            state.refresh_attempts = 0;
            state.status = SessionStatus::LoggedOut;

            let change = StatusChange::new(SessionStatus::LoggedOut, None);
            match reason {
                Some(reason) => change.because(reason),
                None => change,
            }
        };
        self.subscribers.emit(&change);
        true
    }
}

fn ready(outcome: RefreshOutcome) -> SharedRefresh {
    futures::future::ready(outcome).boxed().shared()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
