//! Key derivation for a session's coordinated store entries.

/// The coordinated key triple for one session.
///
/// All three keys share a `{...}` hash tag so a Redis cluster places them
/// in the same slot and the atomic scripts may touch them together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Hash of field name -> serialized value.
    pub data: String,
    /// Scalar holding the current lock token.
    pub lock: String,
    /// Script bookkeeping (persisted session timeout); not exposed to callers.
    pub internal: String,
}

impl SessionKeys {
    /// Derive the key triple for `session_id` under `application_name`.
    ///
    /// Deterministic and collision-free: sessions with different ids or
    /// application names never share a key.
    #[must_use]
    pub fn new(application_name: &str, session_id: &str) -> Self {
        let id = format!("{application_name}_{session_id}");
        Self {
            data: format!("{{{id}}}_Data"),
            lock: format!("{{{id}}}_Write_Lock"),
            internal: format!("{{{id}}}_Internal"),
        }
    }
}

/// Derive the store key for an output-cache entry.
#[must_use]
pub fn cache_key(application_name: &str, key: &str) -> String {
    format!("{application_name}_{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_prefixed_and_tagged() {
        let keys = SessionKeys::new("app", "s1");
        assert_eq!(keys.data, "{app_s1}_Data");
        assert_eq!(keys.lock, "{app_s1}_Write_Lock");
        assert_eq!(keys.internal, "{app_s1}_Internal");
    }

    #[test]
    fn test_keys_do_not_collide() {
        let a = SessionKeys::new("app", "s1");
        let b = SessionKeys::new("app", "s2");
        let c = SessionKeys::new("other", "s1");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_cache_key_prefix() {
        assert_eq!(cache_key("app", "page"), "app_page");
    }
}
