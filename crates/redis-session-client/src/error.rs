//! Store client errors.

use redis_session_core::ConfigError;
use thiserror::Error;

/// Store client error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transport-level failure. Transient failures are retried by the
    /// policy until the retry window elapses.
    #[error("transport failure: {message}")]
    Transport { message: String, transient: bool },
    /// The store no longer recognizes an atomic script (its script cache
    /// was cleared). Retried exactly once immediately to force
    /// re-registration.
    #[error("atomic script not registered with the store")]
    ScriptMissing,
    /// A script reply did not have the expected shape. Never retried.
    #[error("malformed script reply: {0}")]
    Decode(String),
    /// Invalid configuration. Fails fast, never retried.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// A transient transport failure.
    #[must_use]
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// A transport failure that retrying cannot fix.
    #[must_use]
    pub fn fatal<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether the retry policy may try this call again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::ScriptMissing => true,
            Self::Decode(_) | Self::Config(_) => false,
        }
    }

    /// Whether this is the script-cache-miss case.
    #[must_use]
    pub const fn is_script_missing(&self) -> bool {
        matches!(self, Self::ScriptMissing)
    }
}
