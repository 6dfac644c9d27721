//! Boundary decoders for composite script replies.
//!
//! A session read script replies with a heterogeneous four-element array;
//! it is decoded here, once, into a fixed-shape record with explicit
//! absent/null handling. Nothing downstream touches the dynamic reply tree.

use bytes::Bytes;

use crate::error::StoreError;
use crate::script::ScriptReply;

/// Decoded reply of the two session read scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReadReply {
    /// Current lock token, absent when the session is unlocked.
    pub token: Option<String>,
    /// Whether the lock was already held by someone else.
    pub locked: bool,
    /// Persisted session timeout in seconds; `None` is the "-1" sentinel
    /// meaning the configured default applies.
    pub timeout_secs: Option<u64>,
    /// Field name/blob pairs; absent when the lock was held (no read).
    pub fields: Option<Vec<(String, Bytes)>>,
}

/// Decode a session read reply.
///
/// # Errors
/// Returns [`StoreError::Decode`] when the reply does not have the
/// documented four-element shape.
pub fn decode_session_read(reply: &ScriptReply) -> Result<SessionReadReply, StoreError> {
    let ScriptReply::Array(parts) = reply else {
        return Err(StoreError::Decode(format!(
            "session read reply is not an array: {reply:?}"
        )));
    };
    if parts.len() != 4 {
        return Err(StoreError::Decode(format!(
            "session read reply has {} elements, expected 4",
            parts.len()
        )));
    }

    let token = match &parts[0] {
        ScriptReply::Nil => None,
        ScriptReply::Data(data) if data.is_empty() => None,
        ScriptReply::Data(data) => Some(
            std::str::from_utf8(data)
                .map_err(|_| StoreError::Decode("lock token is not UTF-8".to_string()))?
                .to_string(),
        ),
        other => {
            return Err(StoreError::Decode(format!(
                "unexpected lock token reply: {other:?}"
            )));
        }
    };

    let fields = match &parts[1] {
        ScriptReply::Array(pairs) => Some(decode_field_pairs(pairs)?),
        // The scripts reply with an empty string when the lock was held
        // and no read happened.
        ScriptReply::Nil | ScriptReply::Data(_) => None,
        other => {
            return Err(StoreError::Decode(format!(
                "unexpected field map reply: {other:?}"
            )));
        }
    };

    let timeout_secs = decode_timeout(&parts[2])?;

    let locked = match parts[3].as_int() {
        Some(n) => n != 0,
        None => {
            return Err(StoreError::Decode(format!(
                "unexpected locked flag reply: {:?}",
                parts[3]
            )));
        }
    };

    Ok(SessionReadReply {
        token,
        locked,
        timeout_secs,
        fields,
    })
}

/// Field pairs arrive flattened, `{name, value, name, value, ...}`.
fn decode_field_pairs(pairs: &[ScriptReply]) -> Result<Vec<(String, Bytes)>, StoreError> {
    if pairs.len() % 2 != 0 {
        return Err(StoreError::Decode(format!(
            "field map has odd length {}",
            pairs.len()
        )));
    }
    let mut fields = Vec::with_capacity(pairs.len() / 2);
    for chunk in pairs.chunks_exact(2) {
        let name = chunk[0]
            .as_str()
            .ok_or_else(|| StoreError::Decode("field name is not UTF-8 data".to_string()))?;
        let value = chunk[1]
            .as_data()
            .ok_or_else(|| StoreError::Decode("field value is not data".to_string()))?;
        fields.push((name.to_string(), value.clone()));
    }
    Ok(fields)
}

fn decode_timeout(reply: &ScriptReply) -> Result<Option<u64>, StoreError> {
    let raw = match reply {
        ScriptReply::Int(n) => *n,
        ScriptReply::Data(_) => reply
            .as_str()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| StoreError::Decode("timeout is not an integer".to_string()))?,
        ScriptReply::Nil => -1,
        other @ ScriptReply::Array(_) => {
            return Err(StoreError::Decode(format!(
                "unexpected timeout reply: {other:?}"
            )));
        }
    };
    if raw < 0 {
        Ok(None)
    } else {
        Ok(Some(raw.unsigned_abs()))
    }
}

/// Decode a scalar blob reply (output cache reads and add-if-absent).
///
/// # Errors
/// Returns [`StoreError::Decode`] for non-scalar replies.
pub fn decode_blob(reply: &ScriptReply) -> Result<Option<Bytes>, StoreError> {
    match reply {
        ScriptReply::Nil => Ok(None),
        ScriptReply::Data(data) => Ok(Some(data.clone())),
        other => Err(StoreError::Decode(format!(
            "expected a scalar blob reply, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(bytes: &'static [u8]) -> ScriptReply {
        ScriptReply::Data(Bytes::from_static(bytes))
    }

    #[test]
    fn test_decode_unlocked_read() {
        let reply = ScriptReply::Array(vec![
            data(b""),
            ScriptReply::Array(vec![data(b"key1"), data(b"\"v1\"")]),
            data(b"900"),
            ScriptReply::Int(0),
        ]);
        let decoded = decode_session_read(&reply).unwrap();
        assert_eq!(decoded.token, None);
        assert!(!decoded.locked);
        assert_eq!(decoded.timeout_secs, Some(900));
        assert_eq!(
            decoded.fields,
            Some(vec![("key1".to_string(), Bytes::from_static(b"\"v1\""))])
        );
    }

    #[test]
    fn test_decode_contended_read() {
        let reply = ScriptReply::Array(vec![
            data(b"638000000000000000"),
            data(b""),
            data(b"-1"),
            ScriptReply::Int(1),
        ]);
        let decoded = decode_session_read(&reply).unwrap();
        assert_eq!(decoded.token.as_deref(), Some("638000000000000000"));
        assert!(decoded.locked);
        assert_eq!(decoded.timeout_secs, None);
        assert_eq!(decoded.fields, None);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(decode_session_read(&ScriptReply::Int(1)).is_err());
        let short = ScriptReply::Array(vec![ScriptReply::Nil]);
        assert!(decode_session_read(&short).is_err());
    }

    #[test]
    fn test_decode_rejects_odd_field_list() {
        let reply = ScriptReply::Array(vec![
            data(b""),
            ScriptReply::Array(vec![data(b"orphan")]),
            data(b"900"),
            ScriptReply::Int(0),
        ]);
        assert!(decode_session_read(&reply).is_err());
    }

    #[test]
    fn test_decode_blob() {
        assert_eq!(decode_blob(&ScriptReply::Nil).unwrap(), None);
        assert_eq!(
            decode_blob(&data(b"payload")).unwrap(),
            Some(Bytes::from_static(b"payload"))
        );
        assert!(decode_blob(&ScriptReply::Array(vec![])).is_err());
    }
}
