//! Low-level client for the remote session store.
//!
//! Provides:
//! - `StoreTransport` - Trait over the store's primitive and scripted operations
//! - `RemoteClient` - Transport plus the retry/backoff policy
//! - `SharedConnection` - Process-wide lazily-built client
//! - Backends: in-memory (feature `memory`, default) and Redis (feature `redis`)

pub mod backend;
pub mod client;
pub mod decode;
pub mod error;
pub mod retry;
pub mod script;
pub mod shared;
pub mod transport;

pub use client::RemoteClient;
pub use decode::SessionReadReply;
pub use error::StoreError;
pub use retry::RetryPolicy;
pub use script::{ScriptArg, ScriptKind, ScriptReply};
pub use shared::SharedConnection;
pub use transport::StoreTransport;
