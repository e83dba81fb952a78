//! Credential seam between the token manager and the transport client.

use async_trait::async_trait;

use crate::errors::Result;

/// Supplies a valid access credential before a connection is opened.
///
/// Implementations may suspend (e.g. to join an in-flight renewal) and must
/// fail with [`SyncError::Auth`](crate::SyncError::Auth) when no valid session
/// exists.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return the current access token, renewing first if necessary.
    async fn credential(&self) -> Result<String>;
}

/// Fixed token, for tools and tests that manage auth externally.
#[derive(Clone, Debug)]
pub struct StaticCredential(pub String);

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}
