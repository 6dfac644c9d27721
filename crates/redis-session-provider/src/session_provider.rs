//! Thin request-sequencing adapter for session state.
//!
//! Sequences the per-request flow over [`SessionCacheConnection`]:
//! read (shared or exclusive), mutate the returned collection, then update,
//! release or remove at request end. Liveness decisions (poll-and-retry
//! versus "session locked") belong to the caller; this adapter hands back
//! precise ownership information for them.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use redis_session_client::RemoteClient;
use redis_session_core::{ProviderConfig, SessionItems};

use crate::connection::SessionCacheConnection;
use crate::error::ProviderError;

/// Result of a session fetch.
pub struct SessionFetch {
    /// The session's fields; absent while someone else holds the lock.
    pub items: Option<SessionItems>,
    /// Whether another caller held the write lock.
    pub locked: bool,
    /// The current lock token (ours or the holder's).
    pub lock_token: Option<String>,
    /// Age of the holder's lock, present only on contention.
    pub lock_age: Option<Duration>,
    /// Session timeout in minutes.
    pub timeout_minutes: u64,
}

/// Session state provider over a shared client.
pub struct SessionStateProvider {
    client: Arc<RemoteClient>,
    config: ProviderConfig,
}

impl SessionStateProvider {
    /// Create a provider; the configuration is validated once, up front.
    ///
    /// # Errors
    /// Returns error for invalid configuration.
    pub fn new(client: Arc<RemoteClient>, config: ProviderConfig) -> Result<Self, ProviderError> {
        config.validate()?;
        Ok(Self { client, config })
    }

    fn connection(&self, session_id: &str) -> SessionCacheConnection {
        SessionCacheConnection::new(Arc::clone(&self.client), &self.config, session_id)
    }

    /// Create an empty session record with the given timeout, without
    /// locking.
    ///
    /// # Errors
    /// Returns error for store failures.
    pub async fn create_uninitialized_item(
        &self,
        session_id: &str,
        timeout_minutes: u64,
    ) -> Result<(), ProviderError> {
        let mut items = SessionItems::new();
        self.connection(session_id)
            .write_all(&mut items, Duration::from_secs(timeout_minutes * 60))
            .await
    }

    /// Fetch the session without locking it.
    ///
    /// # Errors
    /// Returns error for store failures.
    pub async fn get_item(&self, session_id: &str) -> Result<SessionFetch, ProviderError> {
        self.fetch(session_id, false).await
    }

    /// Fetch the session and take the exclusive write lock.
    ///
    /// On contention the fetch reports `locked` with the holder's token and
    /// lock age; the caller decides whether to poll again or give up.
    ///
    /// # Errors
    /// Returns error for store failures.
    pub async fn get_item_exclusive(
        &self,
        session_id: &str,
    ) -> Result<SessionFetch, ProviderError> {
        self.fetch(session_id, true).await
    }

    async fn fetch(
        &self,
        session_id: &str,
        exclusive: bool,
    ) -> Result<SessionFetch, ProviderError> {
        let conn = self.connection(session_id);
        let outcome = if exclusive {
            conn.take_write_lock_and_read(SystemTime::now(), self.config.request_timeout)
                .await?
        } else {
            conn.check_write_lock_and_read().await?
        };

        let locked = !outcome.lock_taken;
        let lock_age = if locked {
            outcome.lock_token.as_deref().map(|t| conn.lock_age(t))
        } else {
            None
        };
        Ok(SessionFetch {
            items: outcome.items,
            locked,
            lock_token: outcome.lock_token,
            lock_age,
            timeout_minutes: outcome.timeout_minutes,
        })
    }

    /// Write the session back and release the lock.
    ///
    /// New sessions are written in full; existing ones ship only the
    /// collection's diff, conditioned on `lock_token` still matching. A
    /// lost lock discards the write silently, per the store contract.
    ///
    /// # Errors
    /// Returns error for store or serialization failures.
    pub async fn set_and_release_item(
        &self,
        session_id: &str,
        items: &mut SessionItems,
        lock_token: Option<&str>,
        new_item: bool,
        timeout_minutes: u64,
    ) -> Result<(), ProviderError> {
        let conn = self.connection(session_id);
        let timeout = Duration::from_secs(timeout_minutes * 60);
        if new_item {
            conn.write_all(items, timeout).await
        } else {
            let applied = conn.update_and_release(lock_token, items, timeout).await?;
            if !applied {
                tracing::debug!(session_id, "session write discarded, lock was lost");
            }
            Ok(())
        }
    }

    /// Release the lock without writing.
    ///
    /// # Errors
    /// Returns error for store failures.
    pub async fn release_item(
        &self,
        session_id: &str,
        lock_token: &str,
    ) -> Result<(), ProviderError> {
        self.connection(session_id)
            .release_lock_if_match(lock_token, self.config.session_timeout)
            .await
            .map(|_| ())
    }

    /// Remove the session outright.
    ///
    /// # Errors
    /// Returns error for store failures.
    pub async fn remove_item(
        &self,
        session_id: &str,
        lock_token: Option<&str>,
    ) -> Result<(), ProviderError> {
        self.connection(session_id)
            .remove_and_release(lock_token)
            .await
            .map(|_| ())
    }

    /// Keep-alive: push the session's expiry out to the configured timeout.
    ///
    /// # Errors
    /// Returns error for store failures.
    pub async fn reset_item_timeout(&self, session_id: &str) -> Result<(), ProviderError> {
        self.connection(session_id)
            .refresh_expiry(self.config.session_timeout)
            .await
    }
}
