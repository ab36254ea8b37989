//! # Fibonacci Backoff
//!
//! Progressive retry delays that grow more slowly than exponential backoff.
//!
//! Values are tracked in milliseconds so the bounds can come straight from
//! `BACKOFF_START_MS` / `BACKOFF_MAX_MS`.
//! With a 5s start and 10m cap the sequence is 5s, 5s, 10s, 15s, 25s, 40s, ... 600s.
//!
//! ## Usage
//!
//! ```rust
//! use assistant_operator::controller::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_secs(5), Duration::from_secs(600));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(15));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at the maximum.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in milliseconds (for reset)
    min_ms: u64,
    /// Previous backoff value in milliseconds
    prev_ms: u64,
    /// Current backoff value in milliseconds
    current_ms: u64,
    /// Maximum backoff value in milliseconds
    max_ms: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff bounded by `min` and `max`
    ///
    /// A `max` below `min` is raised to `min`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX).max(1);
        let max_ms = u64::try_from(max.as_millis())
            .unwrap_or(u64::MAX)
            .max(min_ms);
        Self {
            min_ms,
            prev_ms: 0,
            current_ms: min_ms,
            max_ms,
        }
    }

    /// Get the next backoff in milliseconds and advance the sequence
    pub fn next_backoff_ms(&mut self) -> u64 {
        let result_ms = self.current_ms;

        let next_ms = self.prev_ms.saturating_add(self.current_ms);
        self.prev_ms = self.current_ms;
        self.current_ms = std::cmp::min(next_ms, self.max_ms);

        result_ms
    }

    /// Get the next backoff duration and advance the sequence
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_millis(self.next_backoff_ms())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_ms = 0;
        self.current_ms = self.min_ms;
    }
}
