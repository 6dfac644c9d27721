//! Provider configuration.

use std::time::Duration;

use thiserror::Error;

/// Default session timeout when the store has no persisted value.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Default window for retrying transiently failing remote calls.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TTL for an exclusive lock; bounds how long a crashed holder can
/// block a session.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(110);

/// Configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("application name must not be empty")]
    MissingApplicationName,
    #[error("either a connection string or a host is required")]
    MissingEndpoint,
    #[error("session timeout must be non-zero")]
    ZeroSessionTimeout,
}

/// Settings consumed by the session and output-cache providers.
///
/// Invalid configuration fails fast at [`ProviderConfig::validate`] and is
/// never retried.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Namespace prefixed to every key this application writes.
    pub application_name: String,
    /// Full connection string; takes precedence over `host`/`port`.
    pub connection_string: Option<String>,
    /// Store host, used when no connection string is given.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Optional credential.
    pub access_key: Option<String>,
    /// Connect over TLS.
    pub use_tls: bool,
    /// Logical database index.
    pub database: i64,
    /// Connection establishment timeout.
    pub connect_timeout: Option<Duration>,
    /// Per-operation timeout enforced by the transport.
    pub operation_timeout: Option<Duration>,
    /// Hard ceiling for the retry/backoff wrapper.
    pub retry_timeout: Duration,
    /// Session timeout applied when none is persisted for a session.
    pub session_timeout: Duration,
    /// TTL for the exclusive lock entry (how long one request may hold it).
    pub request_timeout: Duration,
    /// When false, the output-cache provider degrades failures to cache
    /// misses instead of propagating them.
    pub throw_on_error: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            application_name: String::new(),
            connection_string: None,
            host: "localhost".to_string(),
            port: 6379,
            access_key: None,
            use_tls: false,
            database: 0,
            connect_timeout: None,
            operation_timeout: None,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            throw_on_error: true,
        }
    }
}

impl ProviderConfig {
    /// Create a configuration for `application_name` with defaults.
    #[must_use]
    pub fn new<S: Into<String>>(application_name: S) -> Self {
        Self {
            application_name: application_name.into(),
            ..Self::default()
        }
    }

    /// Use a full connection string instead of host/port.
    #[must_use]
    pub fn with_connection_string<S: Into<String>>(mut self, s: S) -> Self {
        self.connection_string = Some(s.into());
        self
    }

    /// Set the store endpoint.
    #[must_use]
    pub fn with_endpoint<S: Into<String>>(mut self, host: S, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the credential.
    #[must_use]
    pub fn with_access_key<S: Into<String>>(mut self, key: S) -> Self {
        self.access_key = Some(key.into());
        self
    }

    /// Connect over TLS.
    #[must_use]
    pub const fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    /// Set the retry window.
    #[must_use]
    pub const fn with_retry_timeout(mut self, window: Duration) -> Self {
        self.retry_timeout = window;
        self
    }

    /// Set the default session timeout.
    #[must_use]
    pub const fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the exclusive lock TTL.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Degrade output-cache failures to misses instead of errors.
    #[must_use]
    pub const fn degrade_on_error(mut self) -> Self {
        self.throw_on_error = false;
        self
    }

    /// Check the configuration before first use.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::MissingApplicationName);
        }
        if self.connection_string.is_none() && self.host.is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.session_timeout.is_zero() {
            return Err(ConfigError::ZeroSessionTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_with_app_name() {
        assert!(ProviderConfig::new("app").validate().is_ok());
    }

    #[test]
    fn test_missing_application_name_fails_fast() {
        let config = ProviderConfig::default();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingApplicationName)
        );
    }

    #[test]
    fn test_missing_endpoint_fails_fast() {
        let mut config = ProviderConfig::new("app");
        config.host = String::new();
        assert_eq!(config.validate(), Err(ConfigError::MissingEndpoint));

        let with_conn = config.with_connection_string("redis://somewhere:6379");
        assert!(with_conn.validate().is_ok());
    }

    #[test]
    fn test_zero_session_timeout_fails_fast() {
        let config = ProviderConfig::new("app").with_session_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroSessionTimeout));
    }
}
