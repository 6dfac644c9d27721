//! In-memory store backend.
//!
//! Useful for development and single-process tests. Each named script runs
//! under one mutex, giving the same indivisibility the real store provides
//! server-side. Entries expire lazily on access; TTL is the sole expiry
//! mechanism, there is no sweeper.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::script::{ScriptArg, ScriptKind, ScriptReply};
use crate::transport::StoreTransport;

enum EntryValue {
    Scalar(Bytes),
    Hash(HashMap<String, Bytes>),
}

struct Entry {
    value: EntryValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn scalar(bytes: Bytes, ttl: Duration) -> Self {
        Self {
            value: EntryValue::Scalar(bytes),
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory implementation of [`StoreTransport`].
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_err<T>(err: std::sync::PoisonError<T>) -> StoreError {
    StoreError::fatal(format!("store mutex poisoned: {err}"))
}

/// Drop `key` if its entry has expired, then return a live reference.
fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn live_scalar(
    entries: &mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<Bytes> {
    match live(entries, key, now).map(|e| &e.value) {
        Some(EntryValue::Scalar(bytes)) => Some(bytes.clone()),
        _ => None,
    }
}

fn expire_entry(entries: &mut HashMap<String, Entry>, key: &str, ttl: Duration, now: Instant) {
    if let Some(entry) = live(entries, key, now) {
        entry.expires_at = Some(now + ttl);
    }
}

fn arg_str(args: &[ScriptArg], index: usize) -> Result<&str, StoreError> {
    match args.get(index) {
        Some(ScriptArg::Str(s)) => Ok(s),
        other => Err(StoreError::Decode(format!(
            "script arg {index}: expected string, got {other:?}"
        ))),
    }
}

fn arg_int(args: &[ScriptArg], index: usize) -> Result<i64, StoreError> {
    match args.get(index) {
        Some(ScriptArg::Int(n)) => Ok(*n),
        other => Err(StoreError::Decode(format!(
            "script arg {index}: expected integer, got {other:?}"
        ))),
    }
}

fn arg_bytes(args: &[ScriptArg], index: usize) -> Result<Bytes, StoreError> {
    match args.get(index) {
        Some(ScriptArg::Bytes(b)) => Ok(b.clone()),
        other => Err(StoreError::Decode(format!(
            "script arg {index}: expected bytes, got {other:?}"
        ))),
    }
}

fn key_at<'a>(keys: &'a [String], index: usize) -> Result<&'a str, StoreError> {
    keys.get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Decode(format!("script key {index} missing")))
}

fn secs(ttl: i64) -> Duration {
    Duration::from_secs(ttl.max(0).unsigned_abs())
}

/// Build the four-element session read reply the scripts use on the wire.
fn session_read_reply(
    token: Option<&Bytes>,
    fields: Option<Vec<(String, Bytes)>>,
    timeout_secs: Option<i64>,
    locked: bool,
) -> ScriptReply {
    let token_part = match token {
        Some(bytes) => ScriptReply::Data(bytes.clone()),
        None => ScriptReply::Data(Bytes::new()),
    };
    let fields_part = match fields {
        Some(pairs) => ScriptReply::Array(
            pairs
                .into_iter()
                .flat_map(|(name, value)| {
                    [
                        ScriptReply::Data(Bytes::from(name.into_bytes())),
                        ScriptReply::Data(value),
                    ]
                })
                .collect(),
        ),
        None => ScriptReply::Data(Bytes::new()),
    };
    let timeout_part = ScriptReply::Data(Bytes::from(
        timeout_secs.unwrap_or(-1).to_string().into_bytes(),
    ));
    ScriptReply::Array(vec![
        token_part,
        fields_part,
        timeout_part,
        ScriptReply::Int(i64::from(locked)),
    ])
}

impl MemoryStore {
    /// Read the persisted session timeout and refresh the data/internal
    /// TTLs with it, as the session read scripts do.
    fn read_timeout_and_refresh(
        entries: &mut HashMap<String, Entry>,
        data_key: &str,
        internal_key: &str,
        now: Instant,
    ) -> Option<i64> {
        let timeout = live_scalar(entries, internal_key, now)
            .and_then(|b| std::str::from_utf8(&b).ok().and_then(|s| s.parse::<i64>().ok()))?;
        expire_entry(entries, data_key, secs(timeout), now);
        expire_entry(entries, internal_key, secs(timeout), now);
        Some(timeout)
    }

    fn data_fields(
        entries: &mut HashMap<String, Entry>,
        data_key: &str,
        now: Instant,
    ) -> Vec<(String, Bytes)> {
        match live(entries, data_key, now).map(|e| &e.value) {
            Some(EntryValue::Hash(hash)) => hash
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn eval_session_read(
        entries: &mut HashMap<String, Entry>,
        keys: &[String],
        args: &[ScriptArg],
        take: bool,
    ) -> Result<ScriptReply, StoreError> {
        let now = Instant::now();
        let data_key = key_at(keys, 0)?;
        let lock_key = key_at(keys, 1)?;
        let internal_key = key_at(keys, 2)?;

        let holder = live_scalar(entries, lock_key, now);
        let locked = holder.is_some();
        let token = if take && !locked {
            let token = Bytes::from(arg_str(args, 0)?.to_string().into_bytes());
            let lock_ttl = secs(arg_int(args, 1)?);
            entries.insert(lock_key.to_string(), Entry::scalar(token.clone(), lock_ttl));
            Some(token)
        } else {
            holder
        };

        let timeout = Self::read_timeout_and_refresh(entries, data_key, internal_key, now);
        let fields = if locked {
            None
        } else {
            Some(Self::data_fields(entries, data_key, now))
        };
        Ok(session_read_reply(token.as_ref(), fields, timeout, locked))
    }

    fn eval_release(
        entries: &mut HashMap<String, Entry>,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        let now = Instant::now();
        let data_key = key_at(keys, 0)?;
        let lock_key = key_at(keys, 1)?;
        let internal_key = key_at(keys, 2)?;
        let token = arg_str(args, 0)?;
        let session_ttl = secs(arg_int(args, 1)?);

        let released = live_scalar(entries, lock_key, now)
            .is_some_and(|held| held.as_ref() == token.as_bytes());
        if released {
            entries.remove(lock_key);
        }
        // TTL refresh happens whether or not the lock matched.
        expire_entry(entries, data_key, session_ttl, now);
        expire_entry(entries, internal_key, session_ttl, now);
        Ok(ScriptReply::Int(i64::from(released)))
    }

    fn eval_remove(
        entries: &mut HashMap<String, Entry>,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        let now = Instant::now();
        let data_key = key_at(keys, 0)?;
        let lock_key = key_at(keys, 1)?;
        let internal_key = key_at(keys, 2)?;
        let token = arg_str(args, 0)?;

        let matched = token.is_empty()
            || live_scalar(entries, lock_key, now)
                .is_some_and(|held| held.as_ref() == token.as_bytes());
        if matched {
            entries.remove(data_key);
            entries.remove(lock_key);
            entries.remove(internal_key);
        }
        Ok(ScriptReply::Int(i64::from(matched)))
    }

    fn eval_update(
        entries: &mut HashMap<String, Entry>,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        let now = Instant::now();
        let data_key = key_at(keys, 0)?;
        let lock_key = key_at(keys, 1)?;
        let internal_key = key_at(keys, 2)?;
        let token = arg_str(args, 0)?.to_string();
        let session_ttl = secs(arg_int(args, 1)?);
        let modified = usize::try_from(arg_int(args, 2)?)
            .map_err(|_| StoreError::Decode("negative modified count".to_string()))?;
        let deleted = usize::try_from(arg_int(args, 3)?)
            .map_err(|_| StoreError::Decode("negative deleted count".to_string()))?;

        let matched = token.is_empty()
            || live_scalar(entries, lock_key, now)
                .is_some_and(|held| held.as_ref() == token.as_bytes());
        if !matched {
            // Lost ownership: the write is discarded.
            return Ok(ScriptReply::Int(0));
        }

        let mut hash = match live(entries, data_key, now).map(|e| &mut e.value) {
            Some(EntryValue::Hash(hash)) => std::mem::take(hash),
            _ => HashMap::new(),
        };
        let mut cursor = 4;
        for _ in 0..modified {
            let name = arg_str(args, cursor)?.to_string();
            let value = arg_bytes(args, cursor + 1)?;
            hash.insert(name, value);
            cursor += 2;
        }
        for _ in 0..deleted {
            hash.remove(arg_str(args, cursor)?);
            cursor += 1;
        }

        if hash.is_empty() {
            entries.remove(data_key);
        } else {
            entries.insert(
                data_key.to_string(),
                Entry {
                    value: EntryValue::Hash(hash),
                    expires_at: Some(now + session_ttl),
                },
            );
        }
        entries.insert(
            internal_key.to_string(),
            Entry::scalar(
                Bytes::from(session_ttl.as_secs().to_string().into_bytes()),
                session_ttl,
            ),
        );
        if !token.is_empty() {
            entries.remove(lock_key);
        }
        Ok(ScriptReply::Int(1))
    }

    fn eval_write_all(
        entries: &mut HashMap<String, Entry>,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        let now = Instant::now();
        let data_key = key_at(keys, 0)?;
        let internal_key = key_at(keys, 1)?;
        let session_ttl = secs(arg_int(args, 0)?);
        let count = usize::try_from(arg_int(args, 1)?)
            .map_err(|_| StoreError::Decode("negative field count".to_string()))?;

        let mut hash = HashMap::with_capacity(count);
        let mut cursor = 2;
        for _ in 0..count {
            let name = arg_str(args, cursor)?.to_string();
            let value = arg_bytes(args, cursor + 1)?;
            hash.insert(name, value);
            cursor += 2;
        }

        if hash.is_empty() {
            entries.remove(data_key);
        } else {
            entries.insert(
                data_key.to_string(),
                Entry {
                    value: EntryValue::Hash(hash),
                    expires_at: Some(now + session_ttl),
                },
            );
        }
        entries.insert(
            internal_key.to_string(),
            Entry::scalar(
                Bytes::from(session_ttl.as_secs().to_string().into_bytes()),
                session_ttl,
            ),
        );
        Ok(ScriptReply::Int(1))
    }

    fn eval_cache_add(
        entries: &mut HashMap<String, Entry>,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        let now = Instant::now();
        let key = key_at(keys, 0)?;
        let payload = arg_bytes(args, 0)?;
        let ttl = Duration::from_millis(arg_int(args, 1)?.max(1).unsigned_abs());

        if let Some(existing) = live_scalar(entries, key, now) {
            return Ok(ScriptReply::Data(existing));
        }
        entries.insert(key.to_string(), Entry::scalar(payload.clone(), ttl));
        Ok(ScriptReply::Data(payload))
    }
}

#[async_trait]
impl StoreTransport for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut entries = self.entries.lock().map_err(lock_err)?;
        Ok(live_scalar(&mut entries, key, Instant::now()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(lock_err)?;
        entries.insert(key.to_string(), Entry::scalar(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(lock_err)?;
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().map_err(lock_err)?;
        let now = Instant::now();
        match live(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn eval(
        &self,
        script: ScriptKind,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        let mut entries = self.entries.lock().map_err(lock_err)?;
        match script {
            ScriptKind::TakeWriteLockAndRead => {
                Self::eval_session_read(&mut entries, keys, args, true)
            }
            ScriptKind::CheckWriteLockAndRead => {
                Self::eval_session_read(&mut entries, keys, args, false)
            }
            ScriptKind::ReleaseWriteLock => Self::eval_release(&mut entries, keys, args),
            ScriptKind::RemoveIfLockMatch => Self::eval_remove(&mut entries, keys, args),
            ScriptKind::UpdateAndRelease => Self::eval_update(&mut entries, keys, args),
            ScriptKind::WriteAllAndTimeout => Self::eval_write_all(&mut entries, keys, args),
            ScriptKind::CacheAddIfAbsent => Self::eval_cache_add(&mut entries, keys, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scalar_entries_expire_lazily() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_refreshes_and_reports_missing() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(store.expire("k", Duration::from_secs(60)).await.unwrap());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.get("k").await.unwrap().is_some());
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_add_returns_whichever_value_sticks() {
        let store = MemoryStore::new();
        let keys = vec!["app_page".to_string()];

        let first = store
            .eval(
                ScriptKind::CacheAddIfAbsent,
                &keys,
                &[
                    ScriptArg::Bytes(Bytes::from_static(b"new")),
                    ScriptArg::Int(60_000),
                ],
            )
            .await
            .unwrap();
        assert_eq!(first, ScriptReply::Data(Bytes::from_static(b"new")));

        let second = store
            .eval(
                ScriptKind::CacheAddIfAbsent,
                &keys,
                &[
                    ScriptArg::Bytes(Bytes::from_static(b"other")),
                    ScriptArg::Int(60_000),
                ],
            )
            .await
            .unwrap();
        assert_eq!(second, ScriptReply::Data(Bytes::from_static(b"new")));

        tokio::time::advance(Duration::from_secs(120)).await;
        let third = store
            .eval(
                ScriptKind::CacheAddIfAbsent,
                &keys,
                &[
                    ScriptArg::Bytes(Bytes::from_static(b"fresh")),
                    ScriptArg::Int(60_000),
                ],
            )
            .await
            .unwrap();
        assert_eq!(third, ScriptReply::Data(Bytes::from_static(b"fresh")));
    }
}
