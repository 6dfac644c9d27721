//! Core abstractions for Redis-backed session state.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionKeys` - Deterministic key derivation for a session's entries
//! - `Ticks` - Lock tokens encoded as tick timestamps
//! - `SessionItems` - Change-tracking item collection with diffed writes
//! - `Serializer` - Pluggable value codec (JSON by default)
//! - `ProviderConfig` - Provider configuration with fail-fast validation

pub mod collection;
pub mod config;
pub mod keyspace;
pub mod serialize;
pub mod ticks;

pub use collection::{CollectionError, SessionDiff, SessionItems};
pub use config::{ConfigError, ProviderConfig};
pub use keyspace::SessionKeys;
pub use serialize::{JsonSerializer, SerializeError, Serializer};
pub use ticks::Ticks;
