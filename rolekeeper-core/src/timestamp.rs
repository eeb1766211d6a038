// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(not(test))]
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

#[cfg(test)]
use mock_instant::SystemTimeError;
#[cfg(test)]
use mock_instant::thread_local::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

/// Milliseconds since the UNIX epoch based on system time.
#[derive(
    Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Reads the wall clock.
    ///
    /// A clock set before the UNIX epoch reads as zero, callers needing ordering guarantees use
    /// `Timestamp::after` or a `MonotonicClock`.
    pub fn now() -> Self {
        SystemTime::now().try_into().unwrap_or_default()
    }

    /// Returns this timestamp or, if it would not move forward, the value right after
    /// `previous`.
    pub fn after(self, previous: Timestamp) -> Self {
        if self > previous {
            self
        } else {
            Self(previous.0.saturating_add(1))
        }
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl TryFrom<SystemTime> for Timestamp {
    type Error = SystemTimeError;

    fn try_from(system_time: SystemTime) -> Result<Self, Self::Error> {
        let duration = system_time.duration_since(UNIX_EPOCH)?;
        Ok(Self(duration.as_millis() as u64))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of strictly increasing timestamps.
///
/// Follows the wall clock while it moves forwards. When the wall clock stalls or jumps backwards
/// the clock keeps counting from the last handed out value instead.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn tick(&self) -> Timestamp {
        let now = Timestamp::now();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = now.after(Timestamp(last));
            match self
                .last
                .compare_exchange_weak(last, next.0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}
