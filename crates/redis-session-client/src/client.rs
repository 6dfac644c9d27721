//! The retrying remote client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::script::{ScriptArg, ScriptKind, ScriptReply};
use crate::transport::StoreTransport;

/// Transport plus retry: every remote call goes through the policy.
///
/// Cheap to share; hold it in an `Arc` and reuse it across sessions.
pub struct RemoteClient {
    transport: Arc<dyn StoreTransport>,
    retry: RetryPolicy,
}

impl RemoteClient {
    /// Wrap a transport with a retry policy.
    #[must_use]
    pub fn new(transport: Arc<dyn StoreTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Read a scalar entry.
    ///
    /// # Errors
    /// Returns error when the retry window elapses or the failure is not
    /// transient.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.retry.run(|| self.transport.get(key)).await
    }

    /// Write a scalar entry with a TTL.
    ///
    /// # Errors
    /// See [`RemoteClient::get`].
    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        self.retry
            .run(|| self.transport.set(key, value.clone(), ttl))
            .await
    }

    /// Delete an entry.
    ///
    /// # Errors
    /// See [`RemoteClient::get`].
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.retry.run(|| self.transport.delete(key)).await
    }

    /// Refresh an entry's TTL. Returns false when the entry does not exist.
    ///
    /// # Errors
    /// See [`RemoteClient::get`].
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.retry.run(|| self.transport.expire(key, ttl)).await
    }

    /// Execute a named atomic script.
    ///
    /// # Errors
    /// See [`RemoteClient::get`].
    pub async fn eval(
        &self,
        script: ScriptKind,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        self.retry
            .run(|| self.transport.eval(script, keys, args))
            .await
    }
}
