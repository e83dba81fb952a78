//! Composition root.
//!
//! [`SyncCore`] owns one Token Manager, one Realtime Client and one
//! Reconciler and wires them together:
//!
//! - the realtime client takes its credential from the token manager
//! - a credential rejected by the realtime backend forces logout
//! - a session whose renewals are exhausted forces logout
//! - any logout tears down the connection, the poller and the entity map
//!
//! Nothing is started until [`SyncCore::login`]; everything stops on
//! [`SyncCore::logout`] or a forced logout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use roomdesk_auth::{
    Credential, ExpirySource, HttpExpirySource, HttpRenewalClient, RenewalClient, SessionStatus,
    StatusChange, TokenConfig, TokenManager,
};
use roomdesk_core::{Clock, CredentialProvider, Result, Subscription, SyncError, SystemClock};
use roomdesk_realtime::{ClientConfig, Connector, RealtimeClient, RoomActions, WebSocketConnector};
use roomdesk_settings::RoomdeskSettings;
use roomdesk_sync::{
    HttpSnapshotFetcher, RealtimeSnapshotFetcher, Reconciler, ReconcilerConfig, SnapshotFetcher,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::surface::SurfaceState;

/// Builds a [`SyncCore`] from settings, with injectable collaborators.
///
/// Anything not injected is built from the settings: HTTP renewal,
/// WebSocket transport, and snapshots over REST when `sync.snapshotUrl` is
/// set or over the realtime link otherwise.
#[must_use]
pub struct SyncCoreBuilder {
    settings: RoomdeskSettings,
    clock: Option<Arc<dyn Clock>>,
    renewal: Option<Arc<dyn RenewalClient>>,
    expiry: Option<Arc<dyn ExpirySource>>,
    connector: Option<Arc<dyn Connector>>,
    fetcher: Option<Arc<dyn SnapshotFetcher>>,
}

impl SyncCoreBuilder {
    /// Start from `settings`.
    pub fn new(settings: RoomdeskSettings) -> Self {
        Self {
            settings,
            clock: None,
            renewal: None,
            expiry: None,
            connector: None,
            fetcher: None,
        }
    }

    /// Wall clock for expiry and freshness math.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Renewal endpoint client.
    pub fn renewal_client(mut self, renewal: Arc<dyn RenewalClient>) -> Self {
        self.renewal = Some(renewal);
        self
    }

    /// Out-of-band expiry metadata.
    pub fn expiry_source(mut self, expiry: Arc<dyn ExpirySource>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Realtime transport.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Authoritative snapshot source.
    pub fn fetcher(mut self, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Assemble the components. Nothing connects until login.
    pub fn build(self) -> SyncCore {
        let settings = self.settings;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let renewal = self.renewal.unwrap_or_else(|| {
            Arc::new(HttpRenewalClient::new(
                settings.auth.renewal_url.clone(),
                Arc::clone(&clock),
            )) as Arc<dyn RenewalClient>
        });
        let expiry = self.expiry.or_else(|| {
            settings.auth.expiry_page_url.as_ref().map(|url| {
                Arc::new(HttpExpirySource::new(
                    url.clone(),
                    settings.auth.expiry_meta_name.clone(),
                )) as Arc<dyn ExpirySource>
            })
        });
        let tokens = TokenManager::new(
            TokenConfig::from_settings(&settings.auth),
            renewal,
            expiry,
            Arc::clone(&clock),
        );
        let credentials: Arc<dyn CredentialProvider> = Arc::new(tokens.clone());

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new(settings.realtime.url.clone())) as Arc<dyn Connector>);
        let realtime = RealtimeClient::new(
            ClientConfig::from_settings(&settings.realtime),
            connector,
            Arc::clone(&credentials),
        );

        let fetcher = self.fetcher.unwrap_or_else(|| match &settings.sync.snapshot_url {
            Some(url) => Arc::new(HttpSnapshotFetcher::new(
                url.clone(),
                credentials,
                Duration::from_millis(settings.realtime.request_timeout_ms),
            )) as Arc<dyn SnapshotFetcher>,
            None => Arc::new(RealtimeSnapshotFetcher::new(realtime.clone())),
        });
        let reconciler = Reconciler::new(ReconcilerConfig::from_settings(&settings), fetcher, clock);

        let (surface_tx, _) = watch::channel(SurfaceState::SignedOut);
        let inner = Arc::new(Inner {
            tokens,
            realtime,
            reconciler,
            surface_tx,
            forced_out: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            links: Mutex::new(Vec::new()),
            watcher: Mutex::new(None),
        });
        inner.link();
        SyncCore { inner }
    }
}

struct Inner {
    tokens: TokenManager,
    realtime: RealtimeClient,
    reconciler: Reconciler,
    surface_tx: watch::Sender<SurfaceState>,
    forced_out: AtomicBool,
    /// Bumped on login and logout so a teardown spawned for an earlier
    /// session never touches a later one.
    epoch: AtomicU64,
    links: Mutex<Vec<Subscription>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

/// Session, realtime link and reconciled entities behind one handle.
///
/// Cheap to clone; all clones share the same components.
#[derive(Clone)]
pub struct SyncCore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCore")
            .field("surface", &self.surface())
            .field("session", &self.inner.tokens.status())
            .field("connection", &self.inner.realtime.state())
            .finish_non_exhaustive()
    }
}

impl SyncCore {
    /// Builder seeded with `settings`.
    pub fn builder(settings: RoomdeskSettings) -> SyncCoreBuilder {
        SyncCoreBuilder::new(settings)
    }

    /// Start a session, connect the realtime link and start polling.
    ///
    /// A transient connect failure is not an error: the link keeps
    /// retrying and the surface shows reconnecting. A rejected credential
    /// is.
    #[tracing::instrument(skip_all)]
    pub async fn login(&self, credential: Credential) -> Result<()> {
        let inner = &self.inner;
        let _ = inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.forced_out.store(false, Ordering::SeqCst);

        let _ = inner.tokens.login(credential).await?;
        inner.watch_connection();
        inner.reconciler.attach(&inner.realtime);

        match inner.realtime.connect().await {
            Ok(()) => {}
            Err(err) if err.is_fatal() => {
                inner.publish_surface();
                return Err(err);
            }
            Err(err) => warn!(error = %err, "realtime unavailable at login; retrying in background"),
        }
        inner.reconciler.start_polling();
        inner.publish_surface();
        info!(surface = %self.surface(), "signed in");
        Ok(())
    }

    /// End the session and stop everything it started.
    #[tracing::instrument(skip_all)]
    pub async fn logout(&self) {
        let inner = &self.inner;
        let _ = inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.forced_out.store(false, Ordering::SeqCst);
        inner.teardown().await;
        inner.tokens.logout();
        inner.publish_surface();
    }

    /// Current consumer-facing state.
    pub fn surface(&self) -> SurfaceState {
        *self.inner.surface_tx.borrow()
    }

    /// Receiver that observes every surface change.
    pub fn watch_surface(&self) -> watch::Receiver<SurfaceState> {
        self.inner.surface_tx.subscribe()
    }

    /// The token lifecycle manager.
    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    /// The realtime transport client.
    pub fn realtime(&self) -> &RealtimeClient {
        &self.inner.realtime
    }

    /// The synchronization reconciler.
    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    /// Typed room actions over the realtime link.
    pub fn actions(&self) -> RoomActions {
        RoomActions::new(self.inner.realtime.clone())
    }
}

impl Inner {
    /// Subscribe to session and credential events.
    fn link(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let session = self.tokens.subscribe(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.on_session_change(change);
            }
        });

        let weak = Arc::downgrade(self);
        let rejected = self.realtime.on_auth_failure(move |err| {
            if let Some(inner) = weak.upgrade() {
                inner.tokens.force_logout(&format!("credential rejected: {err}"));
            }
        });

        self.links.lock().extend([session, rejected]);
    }

    fn on_session_change(self: &Arc<Self>, change: &StatusChange) {
        match change.status {
            SessionStatus::Failed => {
                self.tokens.force_logout("renewal attempts exhausted");
            }
            SessionStatus::LoggedOut => {
                if change.reason.is_some() {
                    self.forced_out.store(true, Ordering::SeqCst);
                }
                self.spawn_teardown();
            }
            SessionStatus::Active | SessionStatus::Refreshing | SessionStatus::Expired => {}
        }
        self.publish_surface();
    }

    fn watch_connection(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock();
        if watcher.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let mut state_rx = self.realtime.watch_state();
        let weak: Weak<Self> = Arc::downgrade(self);
        *watcher = Some(tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else { return };
                inner.publish_surface();
            }
        }));
    }

    fn spawn_teardown(self: &Arc<Self>) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        drop(tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else { return };
            if inner.epoch.load(Ordering::SeqCst) == epoch {
                inner.teardown().await;
                inner.publish_surface();
            }
        }));
    }

    async fn teardown(&self) {
        self.reconciler.stop_polling();
        self.reconciler.detach();
        self.realtime.disconnect().await;
        self.reconciler.clear();
    }

    fn publish_surface(&self) {
        let next = SurfaceState::derive(
            self.tokens.status(),
            self.forced_out.load(Ordering::SeqCst),
            self.realtime.state(),
        );
        let changed = self.surface_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(surface = %next, "surface changed");
        }
    }
}

/// Map a failed login into the error a caller acts on.
pub fn login_error_message(err: &SyncError) -> String {
    match err {
        SyncError::Auth(message) => format!("sign-in rejected: {message}"),
        other => format!("sign-in failed: {other}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
