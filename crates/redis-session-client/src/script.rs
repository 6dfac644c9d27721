//! The fixed set of atomic scripts and their argument/reply model.
//!
//! Every multi-step read-modify-write against the store is one of these
//! named scripts, executed by the store as a single indivisible unit.
//! Backends map each kind to their own implementation (Lua for Redis,
//! native code for the in-memory store); the argument conventions below are
//! the contract between the two sides.

use bytes::Bytes;

/// A named atomic script.
///
/// Argument conventions (`KEYS` / `ARGV` per kind):
///
/// | Kind | Keys | Args |
/// |---|---|---|
/// | `TakeWriteLockAndRead` | data, lock, internal | token, lock TTL secs |
/// | `CheckWriteLockAndRead` | data, lock, internal | — |
/// | `ReleaseWriteLock` | data, lock, internal | token, session TTL secs |
/// | `RemoveIfLockMatch` | data, lock, internal | token ("" = unconditional) |
/// | `UpdateAndRelease` | data, lock, internal | token ("" = lock-free), session TTL secs, modified count, deleted count, then name/value pairs, then deleted names |
/// | `WriteAllAndTimeout` | data, internal | session TTL secs, field count, then name/value pairs |
/// | `CacheAddIfAbsent` | cache key | payload, TTL millis |
///
/// Both session read kinds reply with the same four-element array:
/// `[lock token or "", field pairs or "", timeout secs or -1, locked 0/1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    TakeWriteLockAndRead,
    CheckWriteLockAndRead,
    ReleaseWriteLock,
    RemoveIfLockMatch,
    UpdateAndRelease,
    WriteAllAndTimeout,
    CacheAddIfAbsent,
}

/// A typed script argument.
///
/// User data travels as bytes; internal values like timeouts and counts are
/// stringly encoded, matching how the scripts read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptArg {
    /// Opaque payload bytes.
    Bytes(Bytes),
    /// Integer, sent in decimal string form.
    Int(i64),
    /// String value (lock tokens, field names).
    Str(String),
}

impl ScriptArg {
    /// Convenience constructor for owned byte payloads.
    #[must_use]
    pub fn bytes(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

/// A script's composite reply, mirrored from the store's reply tree.
///
/// Decoded exactly once, at the transport boundary, into the fixed-shape
/// records in [`crate::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Int(i64),
    Data(Bytes),
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    /// Integer view; `Nil` reads as zero.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Nil => Some(0),
            _ => None,
        }
    }

    /// Byte view of a data reply.
    #[must_use]
    pub fn as_data(&self) -> Option<&Bytes> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// UTF-8 view of a data reply.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Data(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}
