//! Keepalive bookkeeping for an active session.
//!
//! The controller drops a connection after a period of silence. The
//! streamer ticks this monitor on a fixed period; when nothing has been
//! sent or acknowledged for `threshold`, the tick asks for one keepalive
//! line and the clock restarts.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;

// ============================================================================
// Constants
// ============================================================================

/// How often the monitor is checked.
pub const DEFAULT_KEEPALIVE_PERIOD: Duration = Duration::from_secs(2);

/// Silence after which a keepalive is sent. The controller disconnects
/// after 15s.
pub const DEFAULT_KEEPALIVE_THRESHOLD: Duration = Duration::from_secs(12);

// ============================================================================
// LivenessMonitor
// ============================================================================

/// Tracks last activity and decides when a keepalive is due.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    threshold: Duration,
    last_activity: Option<Instant>,
    running: bool,
}

impl LivenessMonitor {
    /// Creates a stopped monitor.
    #[must_use]
    pub const fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_activity: None,
            running: false,
        }
    }

    /// Starts monitoring. Returns `false` if it was already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.last_activity = Some(now);
        true
    }

    /// Stops monitoring. Safe to call when stopped.
    pub fn stop(&mut self) {
        self.running = false;
        self.last_activity = None;
    }

    /// Records traffic at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Returns `true` while running.
    #[inline]
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Handles a periodic tick.
    ///
    /// Returns `true` when a keepalive should be sent; the activity clock is
    /// reset in that case.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.running {
            return false;
        }

        let Some(last) = self.last_activity else {
            return false;
        };

        if now.saturating_duration_since(last) >= self.threshold {
            self.last_activity = Some(now);
            return true;
        }

        false
    }
}

// ============================================================================
// Tests
// ============================================================================
