//! Provider errors.

use redis_session_client::StoreError;
use redis_session_core::{CollectionError, ConfigError};
use thiserror::Error;

/// Provider error.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Remote store failure, surfaced after the retry window.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Session data failed to (de)serialize.
    #[error(transparent)]
    Collection(#[from] CollectionError),
    /// Invalid configuration, reported at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
