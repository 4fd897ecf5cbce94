//! Builder pattern for streamer configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sandtable_streamer::Streamer;
//!
//! # fn example() -> sandtable_streamer::Result<()> {
//! let streamer = Streamer::builder()
//!     .host("10.0.0.42")
//!     .settle_delay(Duration::from_secs(5))
//!     .build()?;
//!
//! assert_eq!(streamer.config().endpoint.port(), 81);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::RetryPolicy;
use crate::transport::{DEFAULT_PORT, Endpoint};

use super::config::StreamConfig;
use super::core::Streamer;

// ============================================================================
// StreamerBuilder
// ============================================================================

/// Where the controller lives, as given to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Url(String),
    Host { host: String, port: u16 },
}

/// Builder for configuring a [`Streamer`].
///
/// Use [`Streamer::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct StreamerBuilder {
    target: Option<Target>,
    connect_timeout: Option<Duration>,
    keepalive_period: Option<Duration>,
    keepalive_threshold: Option<Duration>,
    settle_delay: Option<Duration>,
    homing_timeout: Option<Option<Duration>>,
    retry: Option<RetryPolicy>,
}

// ============================================================================
// StreamerBuilder Implementation
// ============================================================================

impl StreamerBuilder {
    /// Creates a builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the controller URL, e.g. `ws://10.0.0.42:81`.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.target = Some(Target::Url(url.into()));
        self
    }

    /// Sets the controller host; the port defaults to 81.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        let port = match &self.target {
            Some(Target::Host { port, .. }) => *port,
            _ => DEFAULT_PORT,
        };
        self.target = Some(Target::Host {
            host: host.into(),
            port,
        });
        self
    }

    /// Sets the controller port. Only meaningful together with [`host`](Self::host).
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        if let Some(Target::Host { port: current, .. }) = &mut self.target {
            *current = port;
        } else {
            self.target = Some(Target::Host {
                host: String::new(),
                port,
            });
        }
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets how often the liveness monitor is checked.
    #[inline]
    #[must_use]
    pub fn keepalive_period(mut self, period: Duration) -> Self {
        self.keepalive_period = Some(period);
        self
    }

    /// Sets the silence after which a keepalive is sent.
    #[inline]
    #[must_use]
    pub fn keepalive_threshold(mut self, threshold: Duration) -> Self {
        self.keepalive_threshold = Some(threshold);
        self
    }

    /// Sets the pause after homing completes.
    #[inline]
    #[must_use]
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    /// Sets the homing timeout; `None` waits forever.
    #[inline]
    #[must_use]
    pub fn homing_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.homing_timeout = Some(timeout);
        self
    }

    /// Sets the busy-reply retry policy.
    #[inline]
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Builds the streamer with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no endpoint or host was set, or timings are
    ///   inconsistent
    /// - [`Error::InvalidEndpoint`] / [`Error::Url`] if the endpoint is bad
    pub fn build(self) -> Result<Streamer> {
        let endpoint = self.validate_endpoint()?;

        let mut config = StreamConfig::new(endpoint);
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(period) = self.keepalive_period {
            config.keepalive_period = period;
        }
        if let Some(threshold) = self.keepalive_threshold {
            config.keepalive_threshold = threshold;
        }
        if let Some(delay) = self.settle_delay {
            config.settle_delay = delay;
        }
        if let Some(timeout) = self.homing_timeout {
            config.homing_timeout = timeout;
        }
        if let Some(policy) = self.retry {
            config.retry = policy;
        }

        config.validate()?;
        Ok(Streamer::new(config))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl StreamerBuilder {
    /// Resolves the endpoint configuration.
    fn validate_endpoint(&self) -> Result<Endpoint> {
        match &self.target {
            Some(Target::Url(url)) => Endpoint::parse(url),
            Some(Target::Host { host, port }) if !host.is_empty() => Endpoint::new(host, *port),
            _ => Err(Error::config(
                "Controller endpoint is required. Use .endpoint() or .host() to set it.\n\
                 Example: Streamer::builder().host(\"10.0.0.42\")",
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
