//! Store backends.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "memory")]
pub use self::memory::MemoryStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
