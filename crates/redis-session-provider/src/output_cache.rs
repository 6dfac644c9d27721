//! Blob cache over the store's primitive operations.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use redis_session_client::decode::decode_blob;
use redis_session_client::{RemoteClient, ScriptArg, ScriptKind, StoreError};
use redis_session_core::keyspace;

/// Reader/writer for single-blob cache entries, keyed under the
/// application namespace.
pub struct OutputCacheConnection {
    client: Arc<RemoteClient>,
    application_name: String,
}

impl OutputCacheConnection {
    /// Create a connection for `application_name`.
    #[must_use]
    pub fn new<S: Into<String>>(client: Arc<RemoteClient>, application_name: S) -> Self {
        Self {
            client,
            application_name: application_name.into(),
        }
    }

    fn key(&self, key: &str) -> String {
        keyspace::cache_key(&self.application_name, key)
    }

    /// Read an entry.
    ///
    /// # Errors
    /// Returns error when the store is unreachable past the retry window.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.client.get(&self.key(key)).await
    }

    /// Write an entry unconditionally.
    ///
    /// # Errors
    /// See [`OutputCacheConnection::get`].
    pub async fn set(&self, key: &str, payload: Bytes, ttl: Duration) -> Result<(), StoreError> {
        self.client.set(&self.key(key), payload, ttl).await
    }

    /// Remove an entry.
    ///
    /// # Errors
    /// See [`OutputCacheConnection::get`].
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.client.delete(&self.key(key)).await
    }

    /// Store `payload` only if the key is absent; returns whichever value
    /// ends up stored, in one atomic step.
    ///
    /// # Errors
    /// See [`OutputCacheConnection::get`].
    pub async fn add(&self, key: &str, payload: Bytes, ttl: Duration) -> Result<Bytes, StoreError> {
        let keys = vec![self.key(key)];
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let reply = self
            .client
            .eval(
                ScriptKind::CacheAddIfAbsent,
                &keys,
                &[ScriptArg::Bytes(payload), ScriptArg::Int(ttl_millis)],
            )
            .await?;
        decode_blob(&reply)?
            .ok_or_else(|| StoreError::Decode("add-if-absent returned no payload".to_string()))
    }
}
