//! Streamer timing and endpoint configuration.
//!
//! Defaults match the controller firmware: it disconnects after 15s of
//! silence, needs about 3s to settle after homing and may take up to 35s
//! to home.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::RetryPolicy;
use crate::session::liveness::{DEFAULT_KEEPALIVE_PERIOD, DEFAULT_KEEPALIVE_THRESHOLD};
use crate::transport::Endpoint;

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for the WebSocket to connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after `homing_complete` before the next line.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Longest homing cycle tolerated.
pub const DEFAULT_HOMING_TIMEOUT: Duration = Duration::from_secs(35);

// ============================================================================
// StreamConfig
// ============================================================================

/// Everything a streamer needs to run transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Controller address.
    pub endpoint: Endpoint,

    /// Time allowed for the socket to connect.
    pub connect_timeout: Duration,

    /// How often the liveness monitor is checked.
    pub keepalive_period: Duration,

    /// Silence after which a keepalive is sent.
    pub keepalive_threshold: Duration,

    /// Pause after homing completes.
    pub settle_delay: Duration,

    /// Abort if homing takes longer than this. `None` waits forever.
    pub homing_timeout: Option<Duration>,

    /// Busy-reply retry policy.
    pub retry: RetryPolicy,
}

impl StreamConfig {
    /// Creates a configuration with default timings.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_period: DEFAULT_KEEPALIVE_PERIOD,
            keepalive_threshold: DEFAULT_KEEPALIVE_THRESHOLD,
            settle_delay: DEFAULT_SETTLE_DELAY,
            homing_timeout: Some(DEFAULT_HOMING_TIMEOUT),
            retry: RetryPolicy::default(),
        }
    }

    /// Validates the timings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect timeout must be greater than zero"));
        }

        if self.keepalive_period.is_zero() {
            return Err(Error::config("keepalive period must be greater than zero"));
        }

        if self.keepalive_threshold < self.keepalive_period {
            return Err(Error::config(format!(
                "keepalive threshold ({:?}) must be at least the keepalive period ({:?})",
                self.keepalive_threshold, self.keepalive_period
            )));
        }

        if self.retry.max < self.retry.base {
            return Err(Error::config(format!(
                "retry max delay ({:?}) is below the base delay ({:?})",
                self.retry.max, self.retry.base
            )));
        }

        if self.homing_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("homing timeout must be greater than zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
