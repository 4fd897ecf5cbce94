//! Controller reply classification.
//!
//! Every inbound text message is classified into exactly one [`Reply`].
//! Matching is case-insensitive against the trimmed message; detail text
//! after a `error:`/`alarm:`/`status:` prefix keeps its original case.
//!
//! | Text | Reply |
//! |------|-------|
//! | `ok` before handshake | [`Reply::HandshakeAck`] |
//! | `ok` after handshake | [`Reply::CommandAck`] |
//! | `busy` | [`Reply::Busy`] |
//! | `timeout` | [`Reply::Timeout`] |
//! | `error:<detail>` | [`Reply::Error`] |
//! | `alarm:<detail>` | [`Reply::Alarm`] |
//! | `status:<detail>` | [`Reply::Status`] |
//! | `homing_started` | [`Reply::HomingStarted`] |
//! | `homing_complete` | [`Reply::HomingComplete`] |
//! | `homing_failed` | [`Reply::HomingFailed`] |
//! | anything else | [`Reply::Unrecognized`] |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

// ============================================================================
// Reply
// ============================================================================

/// A classified controller reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Reply {
    /// `ok` answering the handshake probe.
    HandshakeAck,
    /// `ok` acknowledging the line in flight.
    CommandAck,
    /// Controller cannot take the line right now.
    Busy,
    /// Controller gave up waiting on the line.
    Timeout,
    /// Controller rejected the line.
    Error(String),
    /// Controller entered an alarm state.
    Alarm(String),
    /// Informational status report.
    Status(String),
    /// Homing cycle began.
    HomingStarted,
    /// Homing cycle finished.
    HomingComplete,
    /// Homing cycle failed.
    HomingFailed,
    /// Anything else, carried as the trimmed text.
    Unrecognized(String),
}

impl Reply {
    /// Classifies a raw inbound message.
    ///
    /// `handshake_done` selects between [`Reply::HandshakeAck`] and
    /// [`Reply::CommandAck`] for `ok`; nothing else depends on it.
    #[must_use]
    pub fn classify(raw: &str, handshake_done: bool) -> Self {
        let text = raw.trim();
        let lower = text.to_ascii_lowercase();

        match lower.as_str() {
            "ok" if handshake_done => return Self::CommandAck,
            "ok" => return Self::HandshakeAck,
            "busy" => return Self::Busy,
            "timeout" => return Self::Timeout,
            "homing_started" => return Self::HomingStarted,
            "homing_complete" => return Self::HomingComplete,
            "homing_failed" => return Self::HomingFailed,
            _ => {}
        }

        if let Some(detail) = detail_after(text, &lower, "error:") {
            Self::Error(detail)
        } else if let Some(detail) = detail_after(text, &lower, "alarm:") {
            Self::Alarm(detail)
        } else if let Some(detail) = detail_after(text, &lower, "status:") {
            Self::Status(detail)
        } else {
            Self::Unrecognized(text.to_string())
        }
    }
}

/// Returns the text after `prefix` if `lower` starts with it.
///
/// ASCII lowercasing keeps byte offsets identical between `text` and `lower`.
fn detail_after(text: &str, lower: &str, prefix: &str) -> Option<String> {
    lower
        .starts_with(prefix)
        .then(|| text[prefix.len()..].trim().to_string())
}

// ============================================================================
// Tests
// ============================================================================
