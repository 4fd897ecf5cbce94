//! Command lines and the fixed control lines of the wire protocol.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;

// ============================================================================
// Constants
// ============================================================================

/// Probe sent as soon as the socket opens; the controller answers `ok`.
pub const HANDSHAKE_PROBE: &str = "\r\n";

/// Comment line sent to keep the controller's idle timer from firing.
pub const KEEPALIVE_LINE: &str = ";ping";

// ============================================================================
// CommandLine
// ============================================================================

/// One line of the controller's command language.
///
/// Opaque to the streamer: it is sent verbatim and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CommandLine(String);

impl CommandLine {
    /// Creates a command line from text.
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Returns the line text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the line, returning its text.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandLine {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for CommandLine {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl AsRef<str> for CommandLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Tests
// ============================================================================
