//! Generation counters
//!
//! A [`Generation`] is a monotonic stamp. Cached artifacts record the
//! generation they were built at and are stale once their owner has moved on.

use std::fmt;

/// Monotonic version counter used to stamp and validate cached artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Advances the counter and returns the new value.
    pub fn bump(&mut self) -> Generation {
        self.0 = self.0.wrapping_add(1);
        *self
    }

    /// Gets the current value.
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` when an artifact stamped with `stamp` predates this generation.
    #[inline]
    #[must_use]
    pub fn is_newer_than(self, stamp: Generation) -> bool {
        stamp.0 < self.0
    }
}

impl From<u64> for Generation {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}
