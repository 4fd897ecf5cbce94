//! Controller wire protocol.
//!
//! The controller speaks plain text over WebSocket: one command line per
//! message out, one short reply per message back.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `"\r\n"` | Local → Controller | Handshake probe |
//! | `CommandLine` | Local → Controller | One G-code line |
//! | `";ping"` | Local → Controller | Keepalive |
//! | `Reply` | Controller → Local | Ack, busy, error, status, homing |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `line` | Command lines and control lines |
//! | `reply` | Reply classification |

// ============================================================================
// Submodules
// ============================================================================

/// Command lines and fixed control lines.
pub mod line;

/// Reply classification.
pub mod reply;

// ============================================================================
// Re-exports
// ============================================================================

pub use line::{CommandLine, HANDSHAKE_PROBE, KEEPALIVE_LINE};
pub use reply::Reply;
