//! Authoritative snapshot sources.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roomdesk_core::{CredentialProvider, EntityId, Result, SyncError};
use roomdesk_realtime::RealtimeClient;
use roomdesk_realtime::protocol::parse_snapshot;
use serde_json::Value;

/// What a poll covers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PollScope {
    /// Every entity; the result is the full listing.
    All,
    /// One entity.
    Entity(EntityId),
}

impl PollScope {
    /// The entity, for single-entity scopes.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Self::All => None,
            Self::Entity(id) => Some(id),
        }
    }
}

/// Fetches authoritative entity snapshots.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch raw snapshot items (each an object with an `id`).
    async fn fetch(&self, scope: &PollScope) -> Result<Vec<Value>>;
}

/// Snapshots over the realtime connection's snapshot probe chain.
#[derive(Clone, Debug)]
pub struct RealtimeSnapshotFetcher {
    client: RealtimeClient,
}

impl RealtimeSnapshotFetcher {
    /// Fetch through `client`.
    pub fn new(client: RealtimeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotFetcher for RealtimeSnapshotFetcher {
    async fn fetch(&self, scope: &PollScope) -> Result<Vec<Value>> {
        self.client.fetch_snapshot(scope.entity()).await
    }
}

/// Snapshots from a REST endpoint.
///
/// `GET {url}` (with `?entityId=` for one entity) and bearer auth. The body
/// has the same `{success, items}` shape as the realtime snapshot response.
pub struct HttpSnapshotFetcher {
    http: reqwest::Client,
    url: String,
    credentials: Arc<dyn CredentialProvider>,
    timeout: Duration,
}

impl HttpSnapshotFetcher {
    /// Fetcher for the endpoint at `url`.
    pub fn new(url: impl Into<String>, credentials: Arc<dyn CredentialProvider>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            credentials,
            timeout,
        }
    }
}

impl std::fmt::Debug for HttpSnapshotFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSnapshotFetcher")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    async fn fetch(&self, scope: &PollScope) -> Result<Vec<Value>> {
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|e| SyncError::Transport(format!("invalid snapshot url: {e}")))?;
        if let Some(id) = scope.entity() {
            let _ = url.query_pairs_mut().append_pair("entityId", id);
        }
        let token = self.credentials.credential().await?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.http_error(&e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SyncError::Auth(format!("snapshot request rejected with {status}")));
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!("snapshot request failed with {status}")));
        }

        let body: Value = resp.json().await.map_err(|e| {
            if e.is_decode() {
                SyncError::Validation(format!("snapshot body: {e}"))
            } else {
                self.http_error(&e)
            }
        })?;
        parse_snapshot(body)
    }
}

impl HttpSnapshotFetcher {
    fn http_error(&self, e: &reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::timeout("snapshot fetch", u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
