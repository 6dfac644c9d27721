//! Thin output-cache adapter.
//!
//! Works on deserialized values over [`OutputCacheConnection`]. Unlike the
//! session core, this wrapper may degrade: with `throw_on_error` off,
//! failures are logged and treated as cache misses.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use redis_session_client::RemoteClient;
use redis_session_core::serialize::Serializer;
use redis_session_core::{CollectionError, JsonSerializer, ProviderConfig};
use serde_json::Value;

use crate::error::ProviderError;
use crate::output_cache::OutputCacheConnection;

/// Output cache provider over a shared client.
pub struct OutputCacheProvider {
    conn: OutputCacheConnection,
    serializer: Arc<dyn Serializer>,
    throw_on_error: bool,
}

impl OutputCacheProvider {
    /// Create a provider; the configuration is validated once, up front.
    ///
    /// # Errors
    /// Returns error for invalid configuration.
    pub fn new(client: Arc<RemoteClient>, config: &ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self {
            conn: OutputCacheConnection::new(client, config.application_name.clone()),
            serializer: Arc::new(JsonSerializer),
            throw_on_error: config.throw_on_error,
        })
    }

    /// Read a cached value; `None` on miss.
    ///
    /// # Errors
    /// Returns error for store or codec failures, unless degrading.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, ProviderError> {
        match self.try_get(key).await {
            Ok(value) => Ok(value),
            Err(err) if !self.throw_on_error => {
                tracing::warn!(key, error = %err, "output cache read failed, treating as miss");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn try_get(&self, key: &str) -> Result<Option<Value>, ProviderError> {
        match self.conn.get(key).await? {
            Some(blob) => self.decode(key, &blob).map(Some),
            None => Ok(None),
        }
    }

    /// Cache a value until `expires_at`, overwriting any existing entry.
    ///
    /// # Errors
    /// Returns error for store or codec failures, unless degrading.
    pub async fn set(
        &self,
        key: &str,
        value: &Value,
        expires_at: SystemTime,
    ) -> Result<(), ProviderError> {
        let result = self.try_set(key, value, expires_at).await;
        self.degrade(key, "write", result)
    }

    async fn try_set(
        &self,
        key: &str,
        value: &Value,
        expires_at: SystemTime,
    ) -> Result<(), ProviderError> {
        let payload = self.encode(key, value)?;
        self.conn.set(key, payload, ttl_until(expires_at)).await?;
        Ok(())
    }

    /// Store a value only if the key is absent; returns whichever value
    /// ends up cached.
    ///
    /// # Errors
    /// Returns error for store or codec failures, unless degrading (the
    /// degraded result is the caller's own value).
    pub async fn add(
        &self,
        key: &str,
        value: &Value,
        expires_at: SystemTime,
    ) -> Result<Value, ProviderError> {
        match self.try_add(key, value, expires_at).await {
            Ok(stored) => Ok(stored),
            Err(err) if !self.throw_on_error => {
                tracing::warn!(key, error = %err, "output cache add failed, keeping caller value");
                Ok(value.clone())
            }
            Err(err) => Err(err),
        }
    }

    async fn try_add(
        &self,
        key: &str,
        value: &Value,
        expires_at: SystemTime,
    ) -> Result<Value, ProviderError> {
        let payload = self.encode(key, value)?;
        let stored = self.conn.add(key, payload, ttl_until(expires_at)).await?;
        self.decode(key, &stored)
    }

    /// Remove a cached value.
    ///
    /// # Errors
    /// Returns error for store failures, unless degrading.
    pub async fn remove(&self, key: &str) -> Result<(), ProviderError> {
        let result = self.conn.remove(key).await.map_err(ProviderError::from);
        self.degrade(key, "remove", result)
    }

    fn degrade(
        &self,
        key: &str,
        op: &str,
        result: Result<(), ProviderError>,
    ) -> Result<(), ProviderError> {
        match result {
            Err(err) if !self.throw_on_error => {
                tracing::warn!(key, op, error = %err, "output cache operation failed, ignoring");
                Ok(())
            }
            other => other,
        }
    }

    fn encode(&self, key: &str, value: &Value) -> Result<Bytes, ProviderError> {
        let bytes = self
            .serializer
            .to_bytes(value)
            .map_err(|source| CollectionError::Unserializable {
                name: key.to_string(),
                source,
            })?;
        Ok(Bytes::from(bytes))
    }

    fn decode(&self, key: &str, blob: &Bytes) -> Result<Value, ProviderError> {
        self.serializer
            .from_bytes(blob)
            .map_err(|source| CollectionError::Corrupt {
                name: key.to_string(),
                source,
            })
            .map_err(ProviderError::from)
    }
}

fn ttl_until(expires_at: SystemTime) -> Duration {
    expires_at
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::from_millis(1))
}
