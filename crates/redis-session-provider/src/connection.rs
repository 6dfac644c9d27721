//! The per-session locking protocol.
//!
//! Each operation is a single round trip to one atomic script; mutual
//! exclusion across processes comes entirely from the store's atomic
//! execution, never from local locking.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis_session_client::decode::decode_session_read;
use redis_session_client::{RemoteClient, ScriptArg, ScriptKind, SessionReadReply};
use redis_session_core::serialize::Serializer;
use redis_session_core::{JsonSerializer, ProviderConfig, SessionItems, SessionKeys, Ticks};

use crate::error::ProviderError;
use crate::outcome::SessionReadOutcome;

/// Connection to one session's coordinated store entries.
///
/// Cheap to build per request; the heavyweight state is the shared
/// [`RemoteClient`] behind it.
pub struct SessionCacheConnection {
    client: Arc<RemoteClient>,
    keys: SessionKeys,
    key_list: Vec<String>,
    serializer: Arc<dyn Serializer>,
    default_timeout: Duration,
}

impl SessionCacheConnection {
    /// Create a connection for `session_id` with the default JSON codec.
    #[must_use]
    pub fn new(client: Arc<RemoteClient>, config: &ProviderConfig, session_id: &str) -> Self {
        Self::with_serializer(client, config, session_id, Arc::new(JsonSerializer))
    }

    /// Create a connection with a custom value codec.
    #[must_use]
    pub fn with_serializer(
        client: Arc<RemoteClient>,
        config: &ProviderConfig,
        session_id: &str,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        let keys = SessionKeys::new(&config.application_name, session_id);
        let key_list = vec![keys.data.clone(), keys.lock.clone(), keys.internal.clone()];
        Self {
            client,
            keys,
            key_list,
            serializer,
            default_timeout: config.session_timeout,
        }
    }

    /// The key triple this connection coordinates.
    #[must_use]
    pub const fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Try to take the exclusive write lock and read the session.
    ///
    /// Acquires only when the lock entry is absent (or already expired via
    /// TTL); there is no re-entrancy. On contention the outcome carries the
    /// current holder's token and no data.
    ///
    /// # Errors
    /// Returns error when the store is unreachable past the retry window or
    /// a reply is malformed.
    pub async fn take_write_lock_and_read(
        &self,
        now: SystemTime,
        lock_timeout: Duration,
    ) -> Result<SessionReadOutcome, ProviderError> {
        let token = Ticks::from_system_time(now);
        let reply = self
            .client
            .eval(
                ScriptKind::TakeWriteLockAndRead,
                &self.key_list,
                &[
                    ScriptArg::Str(token.to_string()),
                    ScriptArg::Int(as_secs(lock_timeout)),
                ],
            )
            .await?;
        Ok(self.outcome(decode_session_read(&reply)?))
    }

    /// Read the session without taking the lock.
    ///
    /// Never mutates lock state; `lock_taken` in the outcome means "the
    /// session was unlocked".
    ///
    /// # Errors
    /// See [`SessionCacheConnection::take_write_lock_and_read`].
    pub async fn check_write_lock_and_read(&self) -> Result<SessionReadOutcome, ProviderError> {
        let reply = self
            .client
            .eval(ScriptKind::CheckWriteLockAndRead, &self.key_list, &[])
            .await?;
        Ok(self.outcome(decode_session_read(&reply)?))
    }

    /// Release the lock if it still holds `lock_token`; refresh the data
    /// entry's TTL either way.
    ///
    /// A mismatch is a silent no-op: the caller lost ownership and must not
    /// clobber a newer holder. Returns whether the lock was released.
    ///
    /// # Errors
    /// See [`SessionCacheConnection::take_write_lock_and_read`].
    pub async fn release_lock_if_match(
        &self,
        lock_token: &str,
        session_timeout: Duration,
    ) -> Result<bool, ProviderError> {
        let reply = self
            .client
            .eval(
                ScriptKind::ReleaseWriteLock,
                &self.key_list,
                &[
                    ScriptArg::Str(lock_token.to_string()),
                    ScriptArg::Int(as_secs(session_timeout)),
                ],
            )
            .await?;
        Ok(reply.as_int().unwrap_or(0) != 0)
    }

    /// Delete the session's entries and release the lock.
    ///
    /// With `None` the removal is unconditional (lock-free/abandon
    /// semantics); with `Some` it applies only while the lock still holds
    /// that token.
    ///
    /// # Errors
    /// See [`SessionCacheConnection::take_write_lock_and_read`].
    pub async fn remove_and_release(
        &self,
        lock_token: Option<&str>,
    ) -> Result<bool, ProviderError> {
        let reply = self
            .client
            .eval(
                ScriptKind::RemoveIfLockMatch,
                &self.key_list,
                &[ScriptArg::Str(lock_token.unwrap_or_default().to_string())],
            )
            .await?;
        Ok(reply.as_int().unwrap_or(0) != 0)
    }

    /// Apply the collection's diff, persist the timeout, refresh the TTL
    /// and release the lock, as one atomic step.
    ///
    /// With `Some(token)` the whole write is conditioned on the lock still
    /// matching; on mismatch it is discarded and `false` comes back. With
    /// `None` the write applies unconditionally (lock-free mode). On a
    /// confirmed write the collection's tracking sets are cleared.
    ///
    /// # Errors
    /// Returns error for store failures or when a modified value cannot be
    /// serialized.
    pub async fn update_and_release(
        &self,
        lock_token: Option<&str>,
        items: &mut SessionItems,
        session_timeout: Duration,
    ) -> Result<bool, ProviderError> {
        let diff = items.diff()?;
        let mut args = Vec::with_capacity(4 + diff.modified.len() * 2 + diff.deleted.len());
        args.push(ScriptArg::Str(lock_token.unwrap_or_default().to_string()));
        args.push(ScriptArg::Int(as_secs(session_timeout)));
        args.push(ScriptArg::Int(diff.modified.len() as i64));
        args.push(ScriptArg::Int(diff.deleted.len() as i64));
        for (name, value) in diff.modified {
            args.push(ScriptArg::Str(name));
            args.push(ScriptArg::bytes(value));
        }
        for name in diff.deleted {
            args.push(ScriptArg::Str(name));
        }

        let reply = self
            .client
            .eval(ScriptKind::UpdateAndRelease, &self.key_list, &args)
            .await?;
        let applied = reply.as_int().unwrap_or(0) != 0;
        if applied {
            items.mark_persisted();
        }
        Ok(applied)
    }

    /// Write every field and the session timeout, without touching the
    /// lock. Used to create a session record outside the locked flow.
    ///
    /// # Errors
    /// See [`SessionCacheConnection::update_and_release`].
    pub async fn write_all(
        &self,
        items: &mut SessionItems,
        session_timeout: Duration,
    ) -> Result<(), ProviderError> {
        let fields = items.all_fields()?;
        let mut args = Vec::with_capacity(2 + fields.len() * 2);
        args.push(ScriptArg::Int(as_secs(session_timeout)));
        args.push(ScriptArg::Int(fields.len() as i64));
        for (name, value) in fields {
            args.push(ScriptArg::Str(name));
            args.push(ScriptArg::bytes(value));
        }

        let keys = vec![self.keys.data.clone(), self.keys.internal.clone()];
        self.client
            .eval(ScriptKind::WriteAllAndTimeout, &keys, &args)
            .await?;
        items.mark_persisted();
        Ok(())
    }

    /// Refresh the session's TTL without touching its content or the lock.
    ///
    /// # Errors
    /// See [`SessionCacheConnection::take_write_lock_and_read`].
    pub async fn refresh_expiry(&self, session_timeout: Duration) -> Result<(), ProviderError> {
        self.client.expire(&self.keys.data, session_timeout).await?;
        self.client
            .expire(&self.keys.internal, session_timeout)
            .await?;
        Ok(())
    }

    /// How long ago `lock_token` was acquired, by the local clock.
    ///
    /// A token that does not parse as a tick timestamp reads as decades old,
    /// so age-threshold callers break the lock instead of hanging.
    #[must_use]
    pub fn lock_age(&self, lock_token: &str) -> Duration {
        let now = SystemTime::now();
        match Ticks::parse(lock_token) {
            Some(ticks) => ticks.elapsed_at(now),
            None => now.duration_since(UNIX_EPOCH).unwrap_or(Duration::MAX),
        }
    }

    fn outcome(&self, read: SessionReadReply) -> SessionReadOutcome {
        let timeout_secs = read
            .timeout_secs
            .unwrap_or_else(|| self.default_timeout.as_secs());
        let items = read.fields.map(|pairs| {
            let mut items = SessionItems::with_serializer(Arc::clone(&self.serializer));
            for (name, blob) in pairs {
                items.set_raw(&name, blob);
            }
            items
        });
        SessionReadOutcome {
            lock_taken: !read.locked,
            lock_token: read.token,
            items,
            timeout_minutes: timeout_secs / 60,
        }
    }
}

fn as_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs().max(1)).unwrap_or(i64::MAX)
}
