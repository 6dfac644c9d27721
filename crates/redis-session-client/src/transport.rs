//! Trait over the store's primitive operations.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::script::{ScriptArg, ScriptKind, ScriptReply};

/// Raw transport to the remote store.
///
/// One round trip per call; no retry here. Protocol-level idempotence is
/// provided by the atomic scripts, not by the transport.
#[async_trait]
pub trait StoreTransport: Send + Sync {
    /// Read a scalar entry.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Write a scalar entry with a TTL.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError>;

    /// Delete an entry.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Refresh an entry's TTL. Returns false when the entry does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Execute a named atomic script.
    async fn eval(
        &self,
        script: ScriptKind,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError>;
}
