//! Redis store backend (feature-gated).
//!
//! Scripts are registered with SCRIPT LOAD and invoked by digest. When the
//! server's script cache is flushed, EVALSHA answers NOSCRIPT; that surfaces
//! as [`StoreError::ScriptMissing`] and the retry policy's immediate second
//! call re-registers the script.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use redis_session_core::ProviderConfig;

use crate::error::StoreError;
use crate::script::{ScriptArg, ScriptKind, ScriptReply};
use crate::transport::StoreTransport;

const TAKE_WRITE_LOCK_AND_READ: &str = r"
local retArray = {}
local lockValue = ARGV[1]
local isLocked = 0
if redis.call('SETNX', KEYS[2], ARGV[1]) == 1 then
  redis.call('EXPIRE', KEYS[2], ARGV[2])
else
  lockValue = redis.call('GET', KEYS[2])
  isLocked = 1
end
retArray[1] = lockValue
if isLocked == 0 then
  retArray[2] = redis.call('HGETALL', KEYS[1])
else
  retArray[2] = ''
end
local sessionTimeout = redis.call('GET', KEYS[3])
if sessionTimeout ~= false then
  redis.call('EXPIRE', KEYS[1], sessionTimeout)
  redis.call('EXPIRE', KEYS[3], sessionTimeout)
  retArray[3] = sessionTimeout
else
  retArray[3] = '-1'
end
retArray[4] = isLocked
return retArray
";

const CHECK_WRITE_LOCK_AND_READ: &str = r"
local retArray = {}
local lockValue = ''
local isLocked = 0
local writeLockValue = redis.call('GET', KEYS[2])
if writeLockValue ~= false then
  lockValue = writeLockValue
  isLocked = 1
end
retArray[1] = lockValue
if isLocked == 0 then
  retArray[2] = redis.call('HGETALL', KEYS[1])
else
  retArray[2] = ''
end
local sessionTimeout = redis.call('GET', KEYS[3])
if sessionTimeout ~= false then
  redis.call('EXPIRE', KEYS[1], sessionTimeout)
  redis.call('EXPIRE', KEYS[3], sessionTimeout)
  retArray[3] = sessionTimeout
else
  retArray[3] = '-1'
end
retArray[4] = isLocked
return retArray
";

const RELEASE_WRITE_LOCK: &str = r"
local released = 0
if redis.call('GET', KEYS[2]) == ARGV[1] then
  redis.call('DEL', KEYS[2])
  released = 1
end
redis.call('EXPIRE', KEYS[1], ARGV[2])
redis.call('EXPIRE', KEYS[3], ARGV[2])
return released
";

const REMOVE_IF_LOCK_MATCH: &str = r"
local matched = 1
if ARGV[1] ~= '' and redis.call('GET', KEYS[2]) ~= ARGV[1] then
  matched = 0
end
if matched == 1 then
  redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
end
return matched
";

const UPDATE_AND_RELEASE: &str = r"
local matched = 1
if ARGV[1] ~= '' and redis.call('GET', KEYS[2]) ~= ARGV[1] then
  matched = 0
end
if matched == 1 then
  local cursor = 5
  for i = 1, tonumber(ARGV[3]) do
    redis.call('HSET', KEYS[1], ARGV[cursor], ARGV[cursor + 1])
    cursor = cursor + 2
  end
  for i = 1, tonumber(ARGV[4]) do
    redis.call('HDEL', KEYS[1], ARGV[cursor])
    cursor = cursor + 1
  end
  redis.call('SET', KEYS[3], ARGV[2])
  redis.call('EXPIRE', KEYS[1], ARGV[2])
  redis.call('EXPIRE', KEYS[3], ARGV[2])
  if ARGV[1] ~= '' then
    redis.call('DEL', KEYS[2])
  end
end
return matched
";

const WRITE_ALL_AND_TIMEOUT: &str = r"
redis.call('DEL', KEYS[1])
local cursor = 3
for i = 1, tonumber(ARGV[2]) do
  redis.call('HSET', KEYS[1], ARGV[cursor], ARGV[cursor + 1])
  cursor = cursor + 2
end
redis.call('SET', KEYS[2], ARGV[1])
redis.call('EXPIRE', KEYS[1], ARGV[1])
redis.call('EXPIRE', KEYS[2], ARGV[1])
return 1
";

const CACHE_ADD_IF_ABSENT: &str = r"
local retVal = redis.call('GET', KEYS[1])
if retVal == false then
  redis.call('PSETEX', KEYS[1], ARGV[2], ARGV[1])
  retVal = ARGV[1]
end
return retVal
";

struct ScriptEntry {
    source: &'static str,
    script: redis::Script,
    loaded: AtomicBool,
}

impl ScriptEntry {
    fn new(source: &'static str) -> Self {
        Self {
            source,
            script: redis::Script::new(source),
            loaded: AtomicBool::new(false),
        }
    }
}

struct ScriptTable {
    take: ScriptEntry,
    check: ScriptEntry,
    release: ScriptEntry,
    remove: ScriptEntry,
    update: ScriptEntry,
    write_all: ScriptEntry,
    cache_add: ScriptEntry,
}

impl ScriptTable {
    fn new() -> Self {
        Self {
            take: ScriptEntry::new(TAKE_WRITE_LOCK_AND_READ),
            check: ScriptEntry::new(CHECK_WRITE_LOCK_AND_READ),
            release: ScriptEntry::new(RELEASE_WRITE_LOCK),
            remove: ScriptEntry::new(REMOVE_IF_LOCK_MATCH),
            update: ScriptEntry::new(UPDATE_AND_RELEASE),
            write_all: ScriptEntry::new(WRITE_ALL_AND_TIMEOUT),
            cache_add: ScriptEntry::new(CACHE_ADD_IF_ABSENT),
        }
    }

    const fn entry(&self, kind: ScriptKind) -> &ScriptEntry {
        match kind {
            ScriptKind::TakeWriteLockAndRead => &self.take,
            ScriptKind::CheckWriteLockAndRead => &self.check,
            ScriptKind::ReleaseWriteLock => &self.release,
            ScriptKind::RemoveIfLockMatch => &self.remove,
            ScriptKind::UpdateAndRelease => &self.update,
            ScriptKind::WriteAllAndTimeout => &self.write_all,
            ScriptKind::CacheAddIfAbsent => &self.cache_add,
        }
    }
}

/// Redis implementation of [`StoreTransport`].
pub struct RedisStore {
    conn: ConnectionManager,
    scripts: ScriptTable,
}

impl RedisStore {
    /// Connect per the configuration.
    ///
    /// # Errors
    /// Returns error for invalid configuration or when the initial
    /// connection cannot be established.
    pub async fn connect(config: &ProviderConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let url = endpoint_url(config);
        let client = redis::Client::open(url.as_str()).map_err(map_err)?;

        let mut manager_config = ConnectionManagerConfig::new();
        if let Some(timeout) = config.connect_timeout {
            manager_config = manager_config.set_connection_timeout(timeout);
        }
        if let Some(timeout) = config.operation_timeout {
            manager_config = manager_config.set_response_timeout(timeout);
        }
        let conn = client
            .get_connection_manager_with_config(manager_config)
            .await
            .map_err(map_err)?;

        Ok(Self {
            conn,
            scripts: ScriptTable::new(),
        })
    }
}

fn endpoint_url(config: &ProviderConfig) -> String {
    if let Some(url) = &config.connection_string {
        return url.clone();
    }
    let scheme = if config.use_tls { "rediss" } else { "redis" };
    let auth = config
        .access_key
        .as_deref()
        .map(|key| format!(":{key}@"))
        .unwrap_or_default();
    format!(
        "{scheme}://{auth}{}:{}/{}",
        config.host, config.port, config.database
    )
}

fn map_err(err: redis::RedisError) -> StoreError {
    if err.kind() == redis::ErrorKind::NoScriptError {
        return StoreError::ScriptMissing;
    }
    let transient = !matches!(
        err.kind(),
        redis::ErrorKind::TypeError | redis::ErrorKind::InvalidClientConfig
    );
    StoreError::Transport {
        message: err.to_string(),
        transient,
    }
}

fn convert_reply(value: redis::Value) -> Result<ScriptReply, StoreError> {
    match value {
        redis::Value::Nil => Ok(ScriptReply::Nil),
        redis::Value::Int(n) => Ok(ScriptReply::Int(n)),
        redis::Value::Boolean(b) => Ok(ScriptReply::Int(i64::from(b))),
        redis::Value::BulkString(bytes) => Ok(ScriptReply::Data(Bytes::from(bytes))),
        redis::Value::SimpleString(s) => Ok(ScriptReply::Data(Bytes::from(s.into_bytes()))),
        redis::Value::Okay => Ok(ScriptReply::Data(Bytes::from_static(b"OK"))),
        redis::Value::Array(values) => Ok(ScriptReply::Array(
            values
                .into_iter()
                .map(convert_reply)
                .collect::<Result<_, _>>()?,
        )),
        other => Err(StoreError::Decode(format!(
            "unsupported reply type: {other:?}"
        ))),
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl StoreTransport for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(map_err)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value.as_ref(), ttl_secs(ttl))
            .await
            .map_err(map_err)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl_secs(ttl) as i64).await.map_err(map_err)
    }

    async fn eval(
        &self,
        script: ScriptKind,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply, StoreError> {
        let entry = self.scripts.entry(script);
        let mut conn = self.conn.clone();

        if !entry.loaded.load(Ordering::Acquire) {
            let _sha: String = redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(entry.source)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;
            entry.loaded.store(true, Ordering::Release);
        }

        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(entry.script.get_hash()).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            match arg {
                // User data travels as bytes; internal values are strings.
                ScriptArg::Bytes(bytes) => cmd.arg(bytes.as_ref()),
                ScriptArg::Int(n) => cmd.arg(n.to_string()),
                ScriptArg::Str(s) => cmd.arg(s.as_str()),
            };
        }

        match cmd.query_async::<redis::Value>(&mut conn).await {
            Ok(value) => convert_reply(value),
            Err(err) => {
                let mapped = map_err(err);
                if mapped.is_script_missing() {
                    entry.loaded.store(false, Ordering::Release);
                }
                Err(mapped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_from_parts() {
        let config = ProviderConfig::new("app")
            .with_endpoint("cache.example", 6380)
            .with_access_key("secret")
            .with_tls();
        assert_eq!(endpoint_url(&config), "rediss://:secret@cache.example:6380/0");

        let plain = ProviderConfig::new("app");
        assert_eq!(endpoint_url(&plain), "redis://localhost:6379/0");
    }

    #[test]
    fn test_endpoint_url_prefers_connection_string() {
        let config = ProviderConfig::new("app")
            .with_connection_string("redis://elsewhere:7000/2")
            .with_endpoint("ignored", 1);
        assert_eq!(endpoint_url(&config), "redis://elsewhere:7000/2");
    }

    #[test]
    fn test_convert_reply_shapes() {
        let value = redis::Value::Array(vec![
            redis::Value::BulkString(b"tok".to_vec()),
            redis::Value::Nil,
            redis::Value::Int(3),
        ]);
        let reply = convert_reply(value).unwrap();
        assert_eq!(
            reply,
            ScriptReply::Array(vec![
                ScriptReply::Data(Bytes::from_static(b"tok")),
                ScriptReply::Nil,
                ScriptReply::Int(3),
            ])
        );
    }
}
