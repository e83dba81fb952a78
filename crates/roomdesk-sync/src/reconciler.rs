//! Synchronization reconciler.
//!
//! Owns the per-entity snapshot map. Two sources feed it: the periodic
//! authoritative poll (through a [`SnapshotFetcher`]) and realtime events
//! (through an attached [`RealtimeClient`]). Every update goes through
//! [`merge_rule`]; subscribers hear about an entity only when its merged
//! view actually changed.
//!
//! Subscriber callbacks always run after the snapshot map lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use roomdesk_core::{Clock, EntityId, Result, Subscribers, Subscription, SyncError};
use roomdesk_realtime::{ConnectionState, Event, RealtimeClient, event_types};
use roomdesk_settings::RoomdeskSettings;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entity::EntitySnapshot;
use crate::fetcher::{PollScope, SnapshotFetcher};
use crate::merge::{MergeContext, Source, merge_rule, revert_to_poll};
use crate::schema::FieldSchema;

/// Reconciler configuration.
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Authoritative poll cadence.
    pub poll_interval: Duration,
    /// Realtime updates older than this yield to a poll.
    pub staleness_window_ms: i64,
    /// Currency for formatted fields.
    pub currency: String,
    /// Field classification.
    pub schema: FieldSchema,
}

impl ReconcilerConfig {
    /// Build from settings; the staleness window follows the realtime
    /// keep-alive interval.
    pub fn from_settings(settings: &RoomdeskSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.sync.poll_interval_ms),
            staleness_window_ms: i64::try_from(settings.staleness_window_ms()).unwrap_or(i64::MAX),
            currency: settings.sync.currency.clone(),
            schema: FieldSchema::rooms(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_settings(&RoomdeskSettings::default())
    }
}

/// Notification delivered to an entity's subscribers.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityUpdate {
    /// The merged view changed.
    Changed(EntitySnapshot),
    /// A poll covering this entity failed; the last known view is kept.
    PollFailed {
        /// Why the poll failed.
        error: SyncError,
        /// The view still being served.
        last_known: Option<EntitySnapshot>,
    },
}

struct Attachment {
    _subscriptions: Vec<Subscription>,
    watcher: JoinHandle<()>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

struct Poller {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

struct Inner {
    config: ReconcilerConfig,
    fetcher: Arc<dyn SnapshotFetcher>,
    clock: Arc<dyn Clock>,
    entities: Mutex<HashMap<EntityId, EntitySnapshot>>,
    subscribers: Mutex<HashMap<EntityId, Subscribers<EntityUpdate>>>,
    listing: Mutex<Option<HashSet<EntityId>>>,
    realtime_available: AtomicBool,
    attachment: Mutex<Option<Attachment>>,
    poller: Mutex<Option<Poller>>,
}

/// Merges polled snapshots and realtime deltas into one view per entity.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    /// Create an empty reconciler.
    pub fn new(config: ReconcilerConfig, fetcher: Arc<dyn SnapshotFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                clock,
                entities: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                listing: Mutex::new(None),
                realtime_available: AtomicBool::new(false),
                attachment: Mutex::new(None),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Current merged view of one entity.
    pub fn get_snapshot(&self, entity_id: &EntityId) -> Option<EntitySnapshot> {
        self.inner.entities.lock().get(entity_id).cloned()
    }

    /// Ids of every entity currently held.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.inner.entities.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Be notified whenever `entity_id`'s merged view changes or a poll
    /// covering it fails.
    ///
    /// Dropping the returned handle unsubscribes; an entity with no
    /// subscribers that is absent from the latest full listing is then
    /// discarded.
    pub fn subscribe<F>(&self, entity_id: &EntityId, callback: F) -> Subscription
    where
        F: Fn(&EntityUpdate) + Send + Sync + 'static,
    {
        let subscribers = self
            .inner
            .subscribers
            .lock()
            .entry(entity_id.clone())
            .or_default()
            .clone();
        let subscription = subscribers.subscribe(callback);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = entity_id.clone();
        Subscription::new(move || {
            subscription.unsubscribe();
            if let Some(inner) = weak.upgrade() {
                inner.collect_entity(&id);
            }
        })
    }

    /// Fetch and merge the authoritative snapshot.
    ///
    /// On failure the existing views stay in place and the affected
    /// subscribers receive [`EntityUpdate::PollFailed`].
    #[tracing::instrument(skip_all, fields(scope = ?scope))]
    pub async fn poll(&self, scope: PollScope) -> Result<()> {
        match self.inner.fetcher.fetch(&scope).await {
            Ok(items) => {
                self.inner.apply_snapshot(items, scope == PollScope::All);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "poll failed; keeping last known snapshot");
                self.inner.notify_failure(&scope, &err);
                Err(err)
            }
        }
    }

    /// Merge a snapshot obtained elsewhere. `full_listing` marks it as the
    /// complete entity list.
    pub fn apply_snapshot(&self, items: Vec<Value>, full_listing: bool) {
        self.inner.apply_snapshot(items, full_listing);
    }

    /// Merge one realtime event.
    pub fn apply_event(&self, event: &Event) {
        Inner::handle_event(&self.inner, event);
    }

    /// Feed realtime events and connect-time snapshots from `client` into
    /// this reconciler, replacing any previous attachment.
    ///
    /// Whenever the client leaves [`ConnectionState::Connected`], every
    /// entity's live fields revert to its latest polled values.
    pub fn attach(&self, client: &RealtimeClient) {
        let mut subscriptions = Vec::with_capacity(event_types::ALL.len() + 1);
        for event_type in event_types::ALL {
            let weak = Arc::downgrade(&self.inner);
            subscriptions.push(client.on_event(event_type, move |event| {
                if let Some(inner) = weak.upgrade() {
                    Inner::handle_event(&inner, event);
                }
            }));
        }
        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(client.on_snapshot(move |items| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_snapshot(items.clone(), true);
            }
        }));

        let mut state_rx = client.watch_state();
        let weak = Arc::downgrade(&self.inner);
        let watcher = tokio::spawn(async move {
            loop {
                let state = *state_rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else { return };
                inner.set_realtime_available(state == ConnectionState::Connected);
                drop(inner);
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        });

        *self.inner.attachment.lock() = Some(Attachment {
            _subscriptions: subscriptions,
            watcher,
        });
    }

    /// Stop listening to the attached client.
    pub fn detach(&self) {
        let _ = self.inner.attachment.lock().take();
        self.inner.set_realtime_available(false);
    }

    /// Poll everything now and then on every poll interval until
    /// [`stop_polling`](Self::stop_polling).
    pub fn start_polling(&self) {
        let cancel = CancellationToken::new();
        let interval = self.inner.config.poll_interval;
        let reconciler = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = ticker.tick() => {
                        let _ = reconciler.poll(PollScope::All).await;
                    }
                }
            }
        });
        info!(?interval, "poller started");
        if let Some(previous) = self.inner.poller.lock().replace(Poller { cancel, _task: task }) {
            previous.cancel.cancel();
        }
    }

    /// Stop the periodic poll.
    pub fn stop_polling(&self) {
        if let Some(poller) = self.inner.poller.lock().take() {
            poller.cancel.cancel();
        }
    }

    /// Forget every entity. Subscriptions stay registered.
    pub fn clear(&self) {
        self.inner.entities.lock().clear();
        *self.inner.listing.lock() = None;
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("entities", &self.inner.entities.lock().len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn merge_context(&self) -> MergeContext<'_> {
        MergeContext {
            schema: &self.config.schema,
            now_ms: self.clock.now_ms(),
            staleness_window_ms: self.config.staleness_window_ms,
            realtime_available: self.realtime_available.load(Ordering::SeqCst),
            currency: &self.config.currency,
        }
    }

    fn subscribers_for(&self, id: &EntityId) -> Option<Subscribers<EntityUpdate>> {
        self.subscribers.lock().get(id).cloned()
    }

    fn has_subscribers(&self, id: &EntityId) -> bool {
        self.subscribers
            .lock()
            .get(id)
            .is_some_and(|subs| !subs.is_empty())
    }

    fn notify(&self, changed: Vec<EntitySnapshot>) {
        for snapshot in changed {
            if let Some(subs) = self.subscribers_for(&snapshot.id) {
                subs.emit(&EntityUpdate::Changed(snapshot));
            }
        }
    }

    fn apply_snapshot(&self, items: Vec<Value>, full_listing: bool) {
        let ctx = self.merge_context();
        let mut changed = Vec::new();
        {
            let mut entities = self.entities.lock();
            let mut listed = HashSet::with_capacity(items.len());
            for item in items {
                let Some((id, fields)) = split_item(item) else {
                    warn!("snapshot item without an id; skipping");
                    continue;
                };
                let _ = listed.insert(id.clone());
                let entity = entities
                    .entry(id.clone())
                    .or_insert_with(|| EntitySnapshot::new(id));
                let before = entity.clone();
                let _ = merge_rule(entity, &fields, Source::Snapshot, &ctx);
                if !entity.same_view(&before) {
                    changed.push(entity.clone());
                }
            }

            if full_listing {
                let before = entities.len();
                entities.retain(|id, _| listed.contains(id) || self.has_subscribers(id));
                let removed = before - entities.len();
                if removed > 0 {
                    debug!(removed, "dropped entities absent from listing");
                }
                *self.listing.lock() = Some(listed);
            }
        }
        debug!(changed = changed.len(), full_listing, "snapshot merged");
        self.notify(changed);
    }

    fn handle_event(self: &Arc<Self>, event: &Event) {
        match event.event_type.as_str() {
            event_types::ARCHIVED => {
                self.spawn_poll(PollScope::Entity(event.entity_id.clone()));
            }
            event_types::LIST_UPDATED => self.spawn_poll(PollScope::All),
            event_types::ACTIVATED => self.apply_realtime(event, Some("active")),
            event_types::DEACTIVATED => self.apply_realtime(event, Some("inactive")),
            _ => self.apply_realtime(event, None),
        }
    }

    fn spawn_poll(self: &Arc<Self>, scope: PollScope) {
        debug!(scope = ?scope, "event requested a poll");
        let reconciler = Reconciler {
            inner: Arc::clone(self),
        };
        drop(tokio::spawn(async move {
            let _ = reconciler.poll(scope).await;
        }));
    }

    fn apply_realtime(&self, event: &Event, status: Option<&str>) {
        let mut fields = match &event.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                warn!(entity_id = %event.entity_id, payload = %other, "event payload is not an object");
                return;
            }
        };
        if let Some(status) = status {
            let _ = fields
                .entry(self.config.schema.status_field.clone())
                .or_insert_with(|| json!(status));
        }

        let ctx = self.merge_context();
        let changed = {
            let mut entities = self.entities.lock();
            if !entities.contains_key(&event.entity_id) {
                if !self.has_subscribers(&event.entity_id) {
                    debug!(entity_id = %event.entity_id, "event for untracked entity");
                    return;
                }
                let _ = entities.insert(
                    event.entity_id.clone(),
                    EntitySnapshot::new(event.entity_id.clone()),
                );
            }
            let Some(entity) = entities.get_mut(&event.entity_id) else {
                return;
            };
            let before = entity.clone();
            let _ = merge_rule(entity, &fields, Source::Realtime, &ctx);
            (!entity.same_view(&before)).then(|| entity.clone())
        };
        if let Some(snapshot) = changed {
            self.notify(vec![snapshot]);
        }
    }

    fn set_realtime_available(&self, available: bool) {
        let was = self.realtime_available.swap(available, Ordering::SeqCst);
        if was && !available {
            self.revert_live_fields();
        }
    }

    fn revert_live_fields(&self) {
        let mut changed = Vec::new();
        {
            let mut entities = self.entities.lock();
            for entity in entities.values_mut() {
                let before = entity.clone();
                revert_to_poll(entity, &self.config.currency);
                if !entity.same_view(&before) {
                    changed.push(entity.clone());
                }
            }
        }
        info!(reverted = changed.len(), "realtime unavailable; serving polled values");
        self.notify(changed);
    }

    fn notify_failure(&self, scope: &PollScope, error: &SyncError) {
        let targets: Vec<(EntityId, Subscribers<EntityUpdate>)> = {
            let subscribers = self.subscribers.lock();
            match scope {
                PollScope::All => subscribers
                    .iter()
                    .map(|(id, subs)| (id.clone(), subs.clone()))
                    .collect(),
                PollScope::Entity(id) => subscribers
                    .get(id)
                    .map(|subs| vec![(id.clone(), subs.clone())])
                    .unwrap_or_default(),
            }
        };
        for (id, subs) in targets {
            let last_known = self.entities.lock().get(&id).cloned();
            subs.emit(&EntityUpdate::PollFailed {
                error: error.clone(),
                last_known,
            });
        }
    }

    /// Drop `id` if nothing references it any more.
    fn collect_entity(&self, id: &EntityId) {
        let mut entities = self.entities.lock();
        {
            let mut subscribers = self.subscribers.lock();
            if subscribers.get(id).is_some_and(|subs| !subs.is_empty()) {
                return;
            }
            let _ = subscribers.remove(id);
        }
        let listed = self
            .listing
            .lock()
            .as_ref()
            .is_some_and(|listing| listing.contains(id));
        if !listed && entities.remove(id).is_some() {
            debug!(entity_id = %id, "entity collected");
        }
    }
}

/// Split a raw snapshot item into its id and fields.
fn split_item(item: Value) -> Option<(EntityId, Map<String, Value>)> {
    let Value::Object(fields) = item else {
        return None;
    };
    let id = ["id", "entityId"].iter().find_map(|key| match fields.get(*key) {
        Some(Value::String(s)) => Some(EntityId::from(s.as_str())),
        Some(Value::Number(n)) => Some(EntityId::from(n.to_string())),
        _ => None,
    })?;
    Some((id, fields))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
