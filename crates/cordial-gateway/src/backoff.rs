//! Doubling reconnect delay with a floor and a ceiling.

use std::time::Duration;

/// Reconnect delay state.
///
/// Starts at the floor, doubles on every failed attempt up to the ceiling,
/// and returns to the floor after any successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `floor`.
    #[must_use]
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay to wait before the next attempt.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed attempt and return the new delay.
    pub fn fail(&mut self) -> Duration {
        self.current = self
            .current
            .checked_mul(2)
            .unwrap_or(self.ceiling)
            .min(self.ceiling);
        self.current
    }

    /// Return to the floor.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(900))
    }
}
