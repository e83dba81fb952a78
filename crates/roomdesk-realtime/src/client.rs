//! Persistent realtime connection.
//!
//! One driver task per [`RealtimeClient::connect`] call owns the transport.
//! It opens the link, pumps frames in both directions, pings on the
//! keep-alive interval, and reconnects with jittered backoff until the
//! attempt budget runs out. Callers never touch the transport: requests are
//! queued to the driver and resolved through a pending-request table keyed
//! by correlation id.
//!
//! State machine:
//!
//! ```text
//! disconnected ─connect()─▶ connecting ─▶ connected
//!                               ▲            │ link lost
//!                               │            ▼
//!                               └──────── reconnecting ─(budget spent)─▶ terminal
//! ```
//!
//! Every `connect()` and `disconnect()` bumps a generation counter; a driver
//! from an older generation never mutates shared state again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use roomdesk_core::{CredentialProvider, EntityId, Result, Subscribers, Subscription, SyncError};
use roomdesk_settings::RealtimeSettings;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::actions::{chain_of, request_names};
use crate::backoff::reconnect_delay;
use crate::dedup::DedupWindow;
use crate::probe::{ProbeChain, Requester};
use crate::protocol::{self, Event, Inbound, Response};
use crate::transport::{Connector, Transport};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link and no driver.
    Disconnected,
    /// First attempt of a `connect()` in progress.
    Connecting,
    /// Link open.
    Connected,
    /// Link lost; waiting to retry.
    Reconnecting,
    /// Reconnect budget spent; only `connect()` recovers.
    Terminal,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Automatic reconnect attempts before going terminal.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay.
    pub reconnect_base_delay: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max_delay: Duration,
    /// Deadline for opening the link.
    pub connect_timeout: Duration,
    /// Default per-request deadline.
    pub request_timeout: Duration,
    /// Per-alias deadline when probing.
    pub probe_timeout: Duration,
    /// Ping interval; twice this without inbound traffic drops the link.
    pub keepalive_interval: Duration,
    /// Dedup window size.
    pub dedup_capacity: usize,
    /// Dedup timestamp bucket width.
    pub dedup_bucket_ms: u64,
    /// Issued after every successful open.
    pub handshake: ProbeChain,
    /// Issued after the handshake on every successful open.
    pub snapshot: ProbeChain,
}

impl ClientConfig {
    /// Build from the `realtime` settings section.
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        let request_timeout = Duration::from_millis(settings.request_timeout_ms);
        let probe_timeout = Duration::from_millis(settings.probe_timeout_ms);
        Self {
            max_reconnect_attempts: settings.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            request_timeout,
            probe_timeout,
            keepalive_interval: Duration::from_millis(settings.keepalive_interval_ms),
            dedup_capacity: settings.dedup_capacity,
            dedup_bucket_ms: settings.dedup_bucket_ms,
            handshake: chain_of(request_names::HANDSHAKE, request_timeout, probe_timeout),
            snapshot: chain_of(request_names::SNAPSHOT, request_timeout, probe_timeout),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&RealtimeSettings::default())
    }
}

struct PendingRequest {
    name: String,
    tx: oneshot::Sender<Result<Value>>,
}

struct ConnState {
    generation: u64,
    reconnect_attempts: u32,
    link: Option<mpsc::UnboundedSender<String>>,
    pending: HashMap<u64, PendingRequest>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnState {
    fn reject_pending(&mut self) {
        for (id, pending) in self.pending.drain() {
            debug!(request_id = id, name = %pending.name, "rejecting pending request");
            let _ = pending.tx.send(Err(SyncError::Closed));
        }
    }
}

struct Inner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    state_tx: watch::Sender<ConnectionState>,
    conn: Mutex<ConnState>,
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Subscribers<Event>>>,
    snapshots: Subscribers<Vec<Value>>,
    auth_failures: Subscribers<SyncError>,
    dedup: Mutex<DedupWindow>,
}

/// Handle to the realtime connection. Cheap to clone.
///
/// Call [`disconnect`](Self::disconnect) to stop the driver; dropping the
/// last handle does not.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Create a disconnected client.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let dedup = DedupWindow::new(config.dedup_capacity, config.dedup_bucket_ms);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                credentials,
                state_tx,
                conn: Mutex::new(ConnState {
                    generation: 0,
                    reconnect_attempts: 0,
                    link: None,
                    pending: HashMap::new(),
                    cancel: CancellationToken::new(),
                    task: None,
                }),
                next_id: AtomicU64::new(1),
                handlers: RwLock::new(HashMap::new()),
                snapshots: Subscribers::new(),
                auth_failures: Subscribers::new(),
                dedup: Mutex::new(dedup),
            }),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.conn.lock().reconnect_attempts
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.conn.lock().pending.len()
    }

    /// Start a fresh connection, replacing any existing one.
    ///
    /// Pending requests on the old connection are rejected with
    /// [`SyncError::Closed`], the reconnect counter and dedup window reset,
    /// and a new driver starts. Resolves with the outcome of the first open
    /// attempt; on failure the driver keeps retrying in the background.
    #[tracing::instrument(skip_all)]
    pub async fn connect(&self) -> Result<()> {
        let (first_tx, first_rx) = oneshot::channel();
        let (generation, cancel) = {
            let mut conn = self.inner.conn.lock();
            conn.cancel.cancel();
            conn.generation += 1;
            conn.reconnect_attempts = 0;
            conn.link = None;
            conn.reject_pending();
            conn.cancel = CancellationToken::new();
            let _ = self.inner.state_tx.send_replace(ConnectionState::Connecting);
            (conn.generation, conn.cancel.clone())
        };
        self.inner.dedup.lock().clear();
        info!(generation, "connecting");

        let task = tokio::spawn(Arc::clone(&self.inner).drive(generation, cancel, first_tx));
        {
            let mut conn = self.inner.conn.lock();
            if conn.generation == generation {
                conn.task = Some(task);
            }
        }

        first_rx.await.unwrap_or(Err(SyncError::Closed))
    }

    /// Tear down the connection and stop reconnecting.
    ///
    /// Every pending request is rejected with [`SyncError::Closed`].
    #[tracing::instrument(skip_all)]
    pub async fn disconnect(&self) {
        let task = {
            let mut conn = self.inner.conn.lock();
            conn.cancel.cancel();
            conn.generation += 1;
            conn.link = None;
            conn.reject_pending();
            let _ = self
                .inner
                .state_tx
                .send_replace(ConnectionState::Disconnected);
            conn.task.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("disconnected");
    }

    /// Send a correlated request and wait up to `timeout` for its response.
    ///
    /// Exactly one outcome is delivered per request: the matching response,
    /// a timeout, or [`SyncError::Closed`] if the link drops first. A
    /// response arriving after the timeout is discarded.
    #[tracing::instrument(skip_all, fields(name = %name))]
    pub async fn request(&self, name: &str, payload: Value, timeout: Duration) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = protocol::encode_request(id, name, &payload)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut conn = self.inner.conn.lock();
            let Some(link) = conn.link.clone() else {
                return Err(match *self.inner.state_tx.borrow() {
                    ConnectionState::Terminal => SyncError::Terminal {
                        attempts: conn.reconnect_attempts,
                    },
                    _ => SyncError::NotConnected,
                });
            };
            let _ = conn.pending.insert(
                id,
                PendingRequest {
                    name: name.to_string(),
                    tx,
                },
            );
            if link.send(frame).is_err() {
                let _ = conn.pending.remove(&id);
                return Err(SyncError::Closed);
            }
        }
        trace!(request_id = id, "request sent");

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SyncError::Closed),
            Err(_) => {
                let _ = self.inner.conn.lock().pending.remove(&id);
                debug!(request_id = id, "request timed out");
                Err(SyncError::timeout(name, duration_ms(timeout)))
            }
        };
        if let Err(err @ SyncError::Auth(_)) = &outcome {
            warn!(request_id = id, error = %err, "request rejected credentials");
            self.inner.auth_failures.emit(err);
        }
        outcome
    }

    /// Run a probe chain over this connection.
    pub async fn probe<T, F>(&self, chain: &ProbeChain, payload: &Value, accept: F) -> Result<T>
    where
        F: Fn(Value) -> Result<T> + Send,
        T: Send,
    {
        chain.run(self, payload, accept).await
    }

    /// Request the authoritative snapshot for every entity, or just one.
    ///
    /// Unlike the snapshot issued on connect, the result is returned to the
    /// caller only and not published to [`on_snapshot`](Self::on_snapshot).
    pub async fn fetch_snapshot(&self, entity_id: Option<&EntityId>) -> Result<Vec<Value>> {
        let payload = match entity_id {
            Some(id) => json!({ "entityId": id }),
            None => json!({}),
        };
        self.probe(&self.inner.config.snapshot, &payload, protocol::parse_snapshot)
            .await
    }

    /// Register a handler for one event type.
    ///
    /// Duplicate deliveries never reach handlers.
    pub fn on_event<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let subscribers = self
            .inner
            .handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .clone();
        subscribers.subscribe(handler)
    }

    /// Called with the full snapshot fetched after each successful open.
    pub fn on_snapshot<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Vec<Value>) + Send + Sync + 'static,
    {
        self.inner.snapshots.subscribe(handler)
    }

    /// Called whenever the backend rejects the credential.
    pub fn on_auth_failure<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        self.inner.auth_failures.subscribe(handler)
    }

    /// Handshake then snapshot, after each successful open.
    async fn initial_sync(&self, generation: u64) {
        match self
            .probe(&self.inner.config.handshake, &json!({}), Ok)
            .await
        {
            Ok(_) => debug!("handshake acknowledged"),
            Err(err) if err.is_fatal() => return,
            Err(err) => warn!(error = %err, "handshake failed"),
        }

        match self.fetch_snapshot(None).await {
            Ok(items) if self.inner.is_current(generation) => {
                debug!(items = items.len(), "snapshot received");
                self.inner.snapshots.emit(&items);
            }
            Ok(_) => debug!("discarding snapshot from a previous connection"),
            Err(err) => warn!(error = %err, "snapshot request failed"),
        }
    }
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Requester for RealtimeClient {
    async fn request(&self, name: &str, payload: Value, timeout: Duration) -> Result<Value> {
        RealtimeClient::request(self, name, payload, timeout).await
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.conn.lock().generation == generation
    }

    async fn drive(
        self: Arc<Self>,
        generation: u64,
        cancel: CancellationToken,
        first: oneshot::Sender<Result<()>>,
    ) {
        let mut first = Some(first);
        loop {
            let opened = tokio::select! {
                () = cancel.cancelled() => return,
                opened = self.open() => opened,
            };

            let lost = match opened {
                Ok(mut transport) => {
                    let Some(outbound) = self.link_up(generation) else {
                        transport.close().await;
                        return;
                    };
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }
                    let client = RealtimeClient {
                        inner: Arc::clone(&self),
                    };
                    drop(tokio::spawn(async move { client.initial_sync(generation).await }));

                    let lost = self.pump(transport.as_mut(), outbound, &cancel).await;
                    transport.close().await;
                    match lost {
                        Some(err) => err,
                        None => return,
                    }
                }
                Err(err) => {
                    warn!(error = %err, "connect attempt failed");
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(err.clone()));
                    }
                    err
                }
            };

            let Some(attempt) = self.link_down(generation, &lost) else {
                return;
            };
            let delay = reconnect_delay(
                attempt - 1,
                self.config.reconnect_base_delay,
                self.config.reconnect_max_delay,
            );
            info!(attempt, delay_ms = duration_ms(delay), "reconnecting");
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn open(&self) -> Result<Box<dyn Transport>> {
        let credential = self.credentials.credential().await?;
        let timeout = self.config.connect_timeout;
        tokio::time::timeout(timeout, self.connector.connect(&credential))
            .await
            .map_err(|_| SyncError::timeout("connect", duration_ms(timeout)))?
    }

    fn link_up(&self, generation: u64) -> Option<mpsc::UnboundedReceiver<String>> {
        let mut conn = self.conn.lock();
        if conn.generation != generation {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        conn.link = Some(tx);
        conn.reconnect_attempts = 0;
        let _ = self.state_tx.send_replace(ConnectionState::Connected);
        info!(generation, "connected");
        Some(rx)
    }

    /// Record a lost link or failed open. Returns the reconnect attempt to
    /// wait for, or `None` when the driver should stop.
    fn link_down(&self, generation: u64, err: &SyncError) -> Option<u32> {
        let mut conn = self.conn.lock();
        if conn.generation != generation {
            return None;
        }
        conn.link = None;
        conn.reject_pending();

        if err.is_fatal() {
            let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
            drop(conn);
            warn!(error = %err, "credential rejected; not reconnecting");
            self.auth_failures.emit(err);
            return None;
        }
        if conn.reconnect_attempts >= self.config.max_reconnect_attempts {
            let _ = self.state_tx.send_replace(ConnectionState::Terminal);
            warn!(
                attempts = conn.reconnect_attempts,
                error = %err,
                "reconnect budget exhausted"
            );
            return None;
        }
        conn.reconnect_attempts += 1;
        let _ = self.state_tx.send_replace(ConnectionState::Reconnecting);
        Some(conn.reconnect_attempts)
    }

    /// Move frames until the link drops (`Some`) or the driver is cancelled
    /// (`None`).
    async fn pump(
        &self,
        transport: &mut dyn Transport,
        mut outbound: mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
    ) -> Option<SyncError> {
        let keepalive = self.config.keepalive_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => {
                        last_inbound = Instant::now();
                        self.dispatch(&text);
                    }
                    Some(Err(err)) => return Some(err),
                    None => return Some(SyncError::Transport("closed by peer".to_string())),
                },
                frame = outbound.recv() => {
                    let frame = frame?;
                    if let Err(err) = transport.send(frame).await {
                        return Some(err);
                    }
                }
                _ = ticker.tick() => {
                    if last_inbound.elapsed() >= keepalive * 2 {
                        warn!(idle_ms = duration_ms(last_inbound.elapsed()), "link silent; dropping");
                        return Some(SyncError::Transport("keep-alive timeout".to_string()));
                    }
                    if let Err(err) = transport.send(protocol::ping_frame()).await {
                        return Some(err);
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match protocol::decode(text) {
            Ok(Inbound::Response(response)) => self.resolve(response),
            Ok(Inbound::Event(event)) => self.deliver(&event),
            Ok(Inbound::Control(control)) => trace!(kind = %control.kind, "control frame"),
            Err(err) => warn!(error = %err, "dropping malformed frame"),
        }
    }

    fn resolve(&self, response: Response) {
        let id = response.id;
        let pending = self.conn.lock().pending.remove(&id);
        match pending {
            Some(pending) => {
                let _ = pending.tx.send(response.into_result());
            }
            None => debug!(request_id = id, "discarding response with no pending request"),
        }
    }

    fn deliver(&self, event: &Event) {
        if !self.dedup.lock().insert(event) {
            trace!(
                event_type = %event.event_type,
                entity_id = %event.entity_id,
                "duplicate event dropped"
            );
            return;
        }
        let handlers = self.handlers.read().get(&event.event_type).cloned();
        match handlers {
            Some(handlers) => handlers.emit(event),
            None => trace!(event_type = %event.event_type, "no handler for event"),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use assert_matches::assert_matches;
    use roomdesk_core::credential::StaticCredential;
    use roomdesk_core::logging::capture_logs;

    use super::*;
    use crate::protocol::event_types;
    use crate::testing::{self, FakeController, Reply};

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_ms(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn client_with(config: ClientConfig) -> (RealtimeClient, FakeController) {
        let (connector, controller) = testing::fake();
        let client = RealtimeClient::new(
            config,
            Arc::new(connector),
            Arc::new(StaticCredential("tok-1".into())),
        );
        (client, controller)
    }

    fn client() -> (RealtimeClient, FakeController) {
        client_with(ClientConfig::default())
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Event| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn connect_presents_credential_and_runs_initial_requests() {
        let (client, controller) = client();
        controller.respond_with("session:init", json!({"success": true}));
        controller.respond_with("rooms:list", json!({"success": true, "items": []}));

        client.connect().await.unwrap();
        settle().await;

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(controller.credentials(), vec!["tok-1"]);
        assert_eq!(controller.requests_named("session:init").len(), 1);
        assert_eq!(controller.requests_named("rooms:list").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_after_open_is_published() {
        let (client, controller) = client();
        controller.respond_with("session:init", json!({"success": true}));
        controller.respond_with(
            "rooms:list",
            json!({"success": true, "items": [{"id": "room1"}, {"id": "room2"}]}),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let _sub = client.on_snapshot(move |items| seen2.lock().push(items.len()));

        client.connect().await.unwrap();
        settle().await;

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn request_resolves_matching_response() {
        let (client, controller) = client();
        client.connect().await.unwrap();
        controller.respond_with("echo", json!({"ok": true}));

        let value = client
            .request("echo", json!({"x": 1}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn correlation_ids_increase() {
        let (client, controller) = client();
        client.connect().await.unwrap();
        controller.respond_with("a", json!(1));

        let _ = client.request("a", json!({}), Duration::from_secs(1)).await;
        let _ = client.request("a", json!({}), Duration::from_secs(1)).await;
        let ids: Vec<u64> = controller
            .requests_named("a")
            .iter()
            .filter_map(|f| f["id"].as_u64())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[1] > ids[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_after_timeout_is_discarded() {
        let (client, controller) = client();
        client.connect().await.unwrap();

        let handle = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request("slow", json!({}), Duration::from_millis(500))
                    .await
            })
        };
        settle().await;
        let id = controller.last_request_id("slow").unwrap();

        advance_ms(500).await;
        let err = handle.await.unwrap().unwrap_err();
        assert_matches!(err, SyncError::Timeout { operation, timeout_ms: 500 } if operation == "slow");

        let (logs, _guard) = capture_logs();
        controller.inject_response(id, json!({"late": true}));
        settle().await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.pending_requests(), 0);
        assert!(logs.has_message("discarding response with no pending request"));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_and_auth_rejection() {
        let (client, controller) = client();
        client.connect().await.unwrap();
        controller.reply_to(
            "bad",
            Reply::Error {
                code: "NOT_FOUND".into(),
                message: "no such room".into(),
            },
        );
        controller.reply_to(
            "secret",
            Reply::Error {
                code: "401".into(),
                message: "token expired".into(),
            },
        );
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        let _sub = client.on_auth_failure(move |_| {
            let _ = f.fetch_add(1, Ordering::SeqCst);
        });

        let err = client
            .request("bad", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Remote { code, .. } if code == "NOT_FOUND");
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        let err = client
            .request("secret", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Auth(_));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_without_connection_fails_fast() {
        let (client, _controller) = client();
        let err = client
            .request("x", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_event_reaches_handler_once() {
        let (client, controller) = client();
        let (count, handler) = counter();
        let _sub = client.on_event(event_types::METRIC_UPDATED, handler);
        client.connect().await.unwrap();

        controller.inject_event(event_types::METRIC_UPDATED, "room1", json!({"player_count": 3}), 1000);
        controller.inject_event(event_types::METRIC_UPDATED, "room1", json!({"player_count": 3}), 1000);
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_events_are_all_delivered_in_order() {
        let (client, controller) = client();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        let _sub = client.on_event(event_types::STATUS_CHANGED, move |e| {
            o.lock().push(e.timestamp);
        });
        client.connect().await.unwrap();

        for ts in [1000, 3000, 2000] {
            controller.inject_event(event_types::STATUS_CHANGED, "room1", json!({}), ts);
        }
        settle().await;
        assert_eq!(*order.lock(), vec![1000, 3000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_are_per_type_and_unsubscribe_independently() {
        let (client, controller) = client();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let sub_a = client.on_event(event_types::ARCHIVED, cb_a);
        let _sub_b = client.on_event(event_types::ARCHIVED, cb_b);
        client.connect().await.unwrap();

        sub_a.unsubscribe();
        controller.inject_event(event_types::ARCHIVED, "room1", json!({}), 1);
        controller.inject_event(event_types::ACTIVATED, "room1", json!({}), 1);
        settle().await;

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_logged_and_ignored() {
        let (client, controller) = client();
        client.connect().await.unwrap();
        let (logs, _guard) = capture_logs();

        controller.inject_text("{not json");
        settle().await;

        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(logs.has_event(tracing::Level::WARN, "malformed frame"));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_rejects_pending_with_closed() {
        let (client, controller) = client();
        client.connect().await.unwrap();

        let handle = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request("never", json!({}), Duration::from_secs(30))
                    .await
            })
        };
        settle().await;
        assert_eq!(client.pending_requests(), 1);

        client.disconnect().await;
        assert_eq!(handle.await.unwrap().unwrap_err(), SyncError::Closed);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!controller.is_connected());
        assert_eq!(controller.client_closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_rejects_pending_and_reissues_snapshot() {
        let (client, controller) = client();
        controller.respond_with("session:init", json!({"success": true}));
        controller.respond_with("rooms:list", json!({"success": true, "items": []}));
        client.connect().await.unwrap();
        settle().await;

        let handle = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request("never", json!({}), Duration::from_secs(30))
                    .await
            })
        };
        settle().await;

        controller.drop_connection();
        settle().await;
        assert_eq!(handle.await.unwrap().unwrap_err(), SyncError::Closed);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert_eq!(client.reconnect_attempts(), 1);

        // first reconnect delay is at most base * (1 + jitter)
        advance_ms(1_200).await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(controller.connect_count(), 2);
        assert_eq!(controller.requests_named("rooms:list").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn five_failed_reconnects_go_terminal_and_connect_recovers() {
        let (client, controller) = client();
        client.connect().await.unwrap();
        settle().await;

        controller.refuse_connections(Some(SyncError::Transport("refused".into())));
        controller.drop_connection();
        settle().await;

        // backoff tops out at 16s * 1.2 for the fifth attempt
        for _ in 0..5 {
            advance_ms(20_000).await;
        }
        assert_eq!(client.state(), ConnectionState::Terminal);
        assert_eq!(client.reconnect_attempts(), 5);
        assert_eq!(controller.connect_count(), 6);

        let err = client
            .request("x", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::Terminal { attempts: 5 });

        // no further automatic attempts
        advance_ms(60_000).await;
        assert_eq!(controller.connect_count(), 6);

        controller.refuse_connections(None);
        client.connect().await.unwrap();
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(controller.connect_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_connect_keeps_retrying() {
        let (client, controller) = client();
        controller.refuse_connections(Some(SyncError::Transport("refused".into())));

        let err = client.connect().await.unwrap_err();
        assert_matches!(err, SyncError::Transport(_));
        settle().await;
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        controller.refuse_connections(None);
        advance_ms(1_200).await;
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_stops_without_retry() {
        let (client, controller) = client();
        controller.refuse_connections(Some(SyncError::Auth("upgrade rejected with 401".into())));
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        let _sub = client.on_auth_failure(move |_| {
            let _ = f.fetch_add(1, Ordering::SeqCst);
        });

        let err = client.connect().await.unwrap_err();
        assert!(err.is_fatal());
        settle().await;
        advance_ms(60_000).await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(controller.connect_count(), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_auth_rejection_reaches_auth_failure() {
        let (client, controller) = client();
        controller.reply_to(
            "session:init",
            Reply::Error {
                code: "UNAUTHORIZED".into(),
                message: "bad token".into(),
            },
        );
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        let _sub = client.on_auth_failure(move |_| {
            let _ = f.fetch_add(1, Ordering::SeqCst);
        });

        client.connect().await.unwrap();
        settle().await;

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        // no alias and no snapshot after an auth rejection
        assert!(controller.requests_named("init").is_empty());
        assert!(controller.requests_named("rooms:list").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_link_is_dropped_after_two_keepalive_intervals() {
        let (client, controller) = client();
        client.connect().await.unwrap();
        settle().await;

        advance_ms(25_000).await;
        assert_eq!(client.state(), ConnectionState::Connected);
        let pings = controller
            .sent()
            .iter()
            .filter(|f| f.get("kind").and_then(Value::as_str) == Some("ping"))
            .count();
        assert_eq!(pings, 1);

        advance_ms(25_000).await;
        assert_eq!(client.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_keeps_link_alive() {
        let (client, controller) = client();
        client.connect().await.unwrap();
        settle().await;

        for _ in 0..4 {
            advance_ms(20_000).await;
            controller.inject(json!({"kind": "pong"}));
            settle().await;
        }
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_resets_dedup_window() {
        let (client, controller) = client();
        let (count, handler) = counter();
        let _sub = client.on_event(event_types::ACTIVATED, handler);

        client.connect().await.unwrap();
        controller.inject_event(event_types::ACTIVATED, "room1", json!({}), 5);
        settle().await;

        client.connect().await.unwrap();
        controller.inject_event(event_types::ACTIVATED, "room1", json!({}), 5);
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn config_from_settings() {
        let settings = RealtimeSettings {
            max_reconnect_attempts: 2,
            probe_timeout_ms: 500,
            ..RealtimeSettings::default()
        };
        let config = ClientConfig::from_settings(&settings);
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.snapshot.primary(), Some("rooms:list"));
        assert_eq!(config.snapshot.candidates()[1].timeout, Duration::from_millis(500));
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_value(ConnectionState::Terminal).unwrap(),
            json!("terminal")
        );
    }
}
