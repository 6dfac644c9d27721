//! Fixed-shape result of the session read operations.

use redis_session_core::SessionItems;

/// What a take- or check-lock round trip observed.
pub struct SessionReadOutcome {
    /// For take: whether the lock was acquired. For check: whether the
    /// session was unlocked.
    pub lock_taken: bool,
    /// The current lock token: ours on acquisition, the holder's on
    /// contention, absent when checking an unlocked session.
    pub lock_token: Option<String>,
    /// The session's fields; absent when someone else held the lock.
    pub items: Option<SessionItems>,
    /// Session timeout in minutes, with the stored sentinel already
    /// resolved against the configured default.
    pub timeout_minutes: u64,
}
