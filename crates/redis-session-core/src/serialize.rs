//! Pluggable value codec for session fields.

use serde_json::Value;
use thiserror::Error;

/// Codec failure, opaque to the caller.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SerializeError(Box<dyn std::error::Error + Send + Sync>);

impl SerializeError {
    /// Wrap a codec-specific error.
    pub fn new<E: Into<Box<dyn std::error::Error + Send + Sync>>>(err: E) -> Self {
        Self(err.into())
    }
}

/// Converts session values to and from their stored byte form.
///
/// Implement this trait to swap the codec; the store itself treats field
/// values as opaque bytes.
pub trait Serializer: Send + Sync {
    /// Serialize a value for storage.
    ///
    /// # Errors
    /// Returns error if the value cannot be encoded.
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, SerializeError>;

    /// Deserialize a stored blob.
    ///
    /// # Errors
    /// Returns error if the blob is not a valid encoding.
    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, SerializeError>;
}

/// Default JSON codec.
#[derive(Debug, Default, Clone)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, SerializeError> {
        serde_json::to_vec(value).map_err(SerializeError::new)
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Value, SerializeError> {
        serde_json::from_slice(bytes).map_err(SerializeError::new)
    }
}
