//! Busy-reply retry policy.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Delay added per retry attempt.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Upper bound on a single retry delay.
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(5);

/// Consecutive `busy` replies tolerated before the transfer is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Linear backoff with a cap and a retry bound.
///
/// Attempt `n` (1-based) waits `min(base * n, max)`. An attempt number
/// above `max_retries` means give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay added per attempt.
    pub base: Duration,
    /// Cap on any single delay.
    pub max: Duration,
    /// Attempts allowed before giving up.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_RETRY_BASE,
            max: DEFAULT_RETRY_MAX,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before retry attempt `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.max)
    }

    /// Returns `true` once `attempt` exceeds the bound.
    #[inline]
    #[must_use]
    pub const fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }
}

// ============================================================================
// Tests
// ============================================================================
