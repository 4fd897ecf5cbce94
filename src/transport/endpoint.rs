//! Controller endpoint addresses.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Port the controller firmware listens on.
pub const DEFAULT_PORT: u16 = 81;

// ============================================================================
// Endpoint
// ============================================================================

/// A `ws://` or `wss://` controller address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Builds `ws://{host}:{port}`.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid host.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::parse(&format!("ws://{host}:{port}"))
    }

    /// Builds `ws://{host}:81`.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid host.
    pub fn controller(host: &str) -> Result<Self> {
        Self::parse(&format!("ws://{host}:{DEFAULT_PORT}"))
    }

    /// Parses a WebSocket URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the text is not a URL
    /// - [`Error::InvalidEndpoint`] if the scheme is not `ws`/`wss` or there
    ///   is no host
    pub fn parse(text: &str) -> Result<Self> {
        let url = Url::parse(text)?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::invalid_endpoint(text, "scheme must be ws or wss"));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::invalid_endpoint(text, "missing host"));
        }

        Ok(Self { url })
    }

    /// Returns the URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Returns the port, including scheme defaults.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
