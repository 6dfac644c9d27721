//! Lock tokens encoded as tick timestamps.
//!
//! A lock token is a single integer that serves both as a unique lock
//! identifier and as the lock's acquisition time, so lock age is computable
//! from the token alone with the holder's local clock.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of 100 ns ticks per second.
const TICKS_PER_SECOND: u64 = 10_000_000;

/// A point in time expressed as 100 ns ticks since the Unix epoch.
///
/// Wire format is the decimal string of the tick count; [`Ticks::parse`]
/// is the exact inverse of [`fmt::Display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(u64);

impl Ticks {
    /// Capture the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a wall-clock time to ticks.
    ///
    /// Times before the epoch clamp to zero.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let ticks = since_epoch.as_secs() * TICKS_PER_SECOND
            + u64::from(since_epoch.subsec_nanos()) / 100;
        Self(ticks)
    }

    /// Parse a token from its decimal wire form.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        token.trim().parse::<u64>().ok().map(Self)
    }

    /// The raw tick count.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The wall-clock time this tick count encodes.
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        let secs = self.0 / TICKS_PER_SECOND;
        let nanos = (self.0 % TICKS_PER_SECOND) * 100;
        UNIX_EPOCH + Duration::new(secs, nanos as u32)
    }

    /// Elapsed time from this instant until `now`, saturating at zero.
    #[must_use]
    pub fn elapsed_at(self, now: SystemTime) -> Duration {
        now.duration_since(self.to_system_time())
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
