//! Type-safe identifiers.
//!
//! Newtype wrappers keep session ids and timer tokens from being mixed up
//! with cursors and counters.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ============================================================================
// SessionId
// ============================================================================

/// Process-wide counter for session ids.
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Identifies one streaming attempt.
///
/// Every channel event and deferred timer carries the id of the session
/// that created it, so events from a torn-down session can be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates a fresh, never-reused session id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

// ============================================================================
// TimerToken
// ============================================================================

/// Identifies one scheduled deferred action within a session.
///
/// A timer only acts if its token still matches the one the session is
/// waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    /// First token handed out by a session.
    pub(crate) const FIRST: Self = Self(1);

    /// Returns the token following this one.
    #[inline]
    #[must_use]
    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
