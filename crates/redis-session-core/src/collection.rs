//! Change-tracking session item collection.
//!
//! Holds one request's view of a session's fields, deserializing stored
//! blobs lazily and tracking which fields were modified or deleted so the
//! release write can ship a minimal diff instead of the whole record.

use std::collections::hash_map::{self, HashMap};
use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::serialize::{JsonSerializer, SerializeError, Serializer};

/// Collection error.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// A stored blob failed to deserialize. The session record is corrupt;
    /// this is never silently swallowed.
    #[error("stored value for field '{name}' is corrupt: {source}")]
    Corrupt {
        name: String,
        source: SerializeError,
    },
    /// A locally written value could not be serialized for the diff.
    #[error("value for field '{name}' cannot be serialized: {source}")]
    Unserializable {
        name: String,
        source: SerializeError,
    },
}

/// One field's value: still raw as read from the store, or materialized
/// after first access or a local write.
enum FieldState {
    Raw(Bytes),
    Materialized(Value),
}

struct Field {
    name: String,
    state: FieldState,
}

/// The diff accumulated since the collection was last persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionDiff {
    /// Field name/serialized-value pairs to upsert.
    pub modified: Vec<(String, Vec<u8>)>,
    /// Field names to remove.
    pub deleted: Vec<String>,
}

impl SessionDiff {
    /// True when there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Change-tracking collection of session fields.
///
/// Field names are case-insensitive (folded to ASCII lowercase for lookup,
/// tracking, and the wire). Invariants:
/// - the modified and deleted name sets are disjoint;
/// - a write (even of an identical value) marks modified and unmarks deleted;
/// - a removal marks deleted, unmarks modified, and evicts the live value;
/// - after a successful persist both sets are empty again.
pub struct SessionItems {
    fields: HashMap<String, Field>,
    modified: HashSet<String>,
    deleted: HashSet<String>,
    serializer: Arc<dyn Serializer>,
}

impl Default for SessionItems {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionItems {
    /// Create an empty collection with the default JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self::with_serializer(Arc::new(JsonSerializer))
    }

    /// Create an empty collection with a custom codec.
    #[must_use]
    pub fn with_serializer(serializer: Arc<dyn Serializer>) -> Self {
        Self {
            fields: HashMap::new(),
            modified: HashSet::new(),
            deleted: HashSet::new(),
            serializer,
        }
    }

    fn fold(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Number of live fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no live fields exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when there are pending modifications or deletions.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.modified.is_empty() || !self.deleted.is_empty()
    }

    /// Seed a field with its stored bytes, without marking it modified.
    ///
    /// Used when populating the collection from a decoded read reply; the
    /// blob is not deserialized until the field is first accessed.
    pub fn set_raw(&mut self, name: &str, bytes: Bytes) {
        let key = Self::fold(name);
        self.fields.insert(
            key.clone(),
            Field {
                name: key,
                state: FieldState::Raw(bytes),
            },
        );
    }

    /// Read a field, deserializing it on first access and caching the result.
    ///
    /// Returns `None` for fields that do not exist or were removed.
    ///
    /// # Errors
    /// Returns [`CollectionError::Corrupt`] if the stored blob fails to
    /// deserialize.
    pub fn get(&mut self, name: &str) -> Result<Option<&Value>, CollectionError> {
        let key = Self::fold(name);
        match self.fields.get_mut(&key) {
            Some(field) => materialize(field, self.serializer.as_ref()).map(Some),
            None => Ok(None),
        }
    }

    /// Write a field, marking it modified and unmarking any pending deletion.
    pub fn set(&mut self, name: &str, value: Value) {
        let key = Self::fold(name);
        self.deleted.remove(&key);
        self.modified.insert(key.clone());
        self.fields.insert(
            key.clone(),
            Field {
                name: key,
                state: FieldState::Materialized(value),
            },
        );
    }

    /// Remove a field, marking it deleted and unmarking any pending write.
    ///
    /// Returns whether a live field was evicted.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = Self::fold(name);
        self.modified.remove(&key);
        self.deleted.insert(key.clone());
        self.fields.remove(&key).is_some()
    }

    /// Names with pending writes.
    pub fn modified_names(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    /// Names with pending deletions.
    pub fn deleted_names(&self) -> impl Iterator<Item = &str> {
        self.deleted.iter().map(String::as_str)
    }

    /// Lazy, restartable iteration over all live fields.
    ///
    /// Each field is deserialized on demand the first time the iterator
    /// reaches it; iteration order is unspecified.
    pub fn entries(&mut self) -> Entries<'_> {
        Entries {
            inner: self.fields.values_mut(),
            serializer: self.serializer.as_ref(),
        }
    }

    /// Build the minimal write diff for the pending changes.
    ///
    /// # Errors
    /// Returns [`CollectionError::Unserializable`] if a modified value
    /// cannot be encoded.
    pub fn diff(&self) -> Result<SessionDiff, CollectionError> {
        let mut modified = Vec::with_capacity(self.modified.len());
        for name in &self.modified {
            // A modified field is always materialized: `set` stores values.
            let Some(field) = self.fields.get(name) else {
                continue;
            };
            let FieldState::Materialized(value) = &field.state else {
                continue;
            };
            let bytes = self
                .serializer
                .to_bytes(value)
                .map_err(|source| CollectionError::Unserializable {
                    name: name.clone(),
                    source,
                })?;
            modified.push((name.clone(), bytes));
        }
        let mut deleted: Vec<String> = self.deleted.iter().cloned().collect();
        modified.sort_by(|a, b| a.0.cmp(&b.0));
        deleted.sort();
        Ok(SessionDiff { modified, deleted })
    }

    /// Serialize every live field, for the initial full write of a new
    /// session record.
    ///
    /// # Errors
    /// Returns error if a value cannot be encoded.
    pub fn all_fields(&self) -> Result<Vec<(String, Vec<u8>)>, CollectionError> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for field in self.fields.values() {
            let bytes = match &field.state {
                FieldState::Raw(bytes) => bytes.to_vec(),
                FieldState::Materialized(value) => self
                    .serializer
                    .to_bytes(value)
                    .map_err(|source| CollectionError::Unserializable {
                        name: field.name.clone(),
                        source,
                    })?,
            };
            fields.push((field.name.clone(), bytes));
        }
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(fields)
    }

    /// Clear both tracking sets after a confirmed write; the collection
    /// again reflects exactly the server state.
    pub fn mark_persisted(&mut self) {
        self.modified.clear();
        self.deleted.clear();
    }
}

fn materialize<'f>(
    field: &'f mut Field,
    serializer: &dyn Serializer,
) -> Result<&'f Value, CollectionError> {
    if let FieldState::Raw(bytes) = &field.state {
        let value =
            serializer
                .from_bytes(bytes)
                .map_err(|source| CollectionError::Corrupt {
                    name: field.name.clone(),
                    source,
                })?;
        field.state = FieldState::Materialized(value);
    }
    match &field.state {
        FieldState::Materialized(value) => Ok(value),
        FieldState::Raw(_) => unreachable!("materialized above"),
    }
}

/// Iterator over live fields, deserializing each on demand.
pub struct Entries<'a> {
    inner: hash_map::ValuesMut<'a, String, Field>,
    serializer: &'a dyn Serializer,
}

impl<'a> Iterator for Entries<'a> {
    type Item = Result<(&'a str, &'a Value), CollectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let field = self.inner.next()?;
        match materialize(field, self.serializer) {
            Ok(_) => {
                let FieldState::Materialized(value) = &field.state else {
                    unreachable!("materialized above");
                };
                Some(Ok((field.name.as_str(), value)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_roundtrip() {
        let mut items = SessionItems::new();
        items.set("key", json!("value"));
        assert_eq!(items.get("key").unwrap(), Some(&json!("value")));
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let mut items = SessionItems::new();
        items.set("UserName", json!("alice"));
        assert_eq!(items.get("username").unwrap(), Some(&json!("alice")));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_raw_fields_deserialize_lazily() {
        let mut items = SessionItems::new();
        items.set_raw("key", Bytes::from_static(b"\"stored\""));
        assert!(!items.is_dirty());
        assert_eq!(items.get("key").unwrap(), Some(&json!("stored")));
    }

    #[test]
    fn test_corrupt_blob_is_surfaced() {
        let mut items = SessionItems::new();
        items.set_raw("key", Bytes::from_static(b"\xff\xfe"));
        let err = items.get("key").unwrap_err();
        assert!(matches!(err, CollectionError::Corrupt { .. }));
    }

    #[test]
    fn test_missing_field_is_none() {
        let mut items = SessionItems::new();
        assert_eq!(items.get("absent").unwrap(), None);
    }

    #[test]
    fn test_tracking_sets_stay_disjoint() {
        let mut items = SessionItems::new();
        items.set("key", json!(1));
        items.remove("key");
        assert_eq!(items.modified_names().count(), 0);
        assert_eq!(items.deleted_names().collect::<Vec<_>>(), vec!["key"]);

        items.set("key", json!(2));
        assert_eq!(items.modified_names().collect::<Vec<_>>(), vec!["key"]);
        assert_eq!(items.deleted_names().count(), 0);
    }

    #[test]
    fn test_remove_evicts_live_value() {
        let mut items = SessionItems::new();
        items.set("key", json!(1));
        assert!(items.remove("key"));
        assert_eq!(items.get("key").unwrap(), None);
        assert!(!items.remove("key"));
    }

    #[test]
    fn test_diff_contains_exactly_the_changes() {
        let mut items = SessionItems::new();
        items.set_raw("key1", Bytes::from_static(b"\"v1\""));
        items.set_raw("key2", Bytes::from_static(b"\"v2\""));
        items.set_raw("key3", Bytes::from_static(b"\"v3\""));

        items.set("key2", json!("v2b"));
        items.remove("key3");

        let diff = items.diff().unwrap();
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].0, "key2");
        assert_eq!(diff.deleted, vec!["key3".to_string()]);
    }

    #[test]
    fn test_mark_persisted_clears_tracking() {
        let mut items = SessionItems::new();
        items.set("key", json!(1));
        items.remove("other");
        assert!(items.is_dirty());
        items.mark_persisted();
        assert!(!items.is_dirty());
        assert!(items.diff().unwrap().is_empty());
    }

    #[test]
    fn test_entries_iterates_all_live_fields() {
        let mut items = SessionItems::new();
        items.set_raw("a", Bytes::from_static(b"1"));
        items.set("b", json!(2));

        let mut seen: Vec<(String, Value)> = items
            .entries()
            .map(|e| e.map(|(n, v)| (n.to_string(), v.clone())))
            .collect::<Result<_, _>>()
            .unwrap();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(seen, vec![("a".into(), json!(1)), ("b".into(), json!(2))]);

        // Restartable: a second pass yields the same fields.
        assert_eq!(items.entries().count(), 2);
    }

    #[test]
    fn test_identical_rewrite_still_marks_modified() {
        let mut items = SessionItems::new();
        items.set_raw("key", Bytes::from_static(b"\"v\""));
        let current = items.get("key").unwrap().cloned().unwrap();
        items.set("key", current);
        assert_eq!(items.modified_names().collect::<Vec<_>>(), vec!["key"]);
    }
}
