//! WebSocket transport layer.
//!
//! This module owns the socket to the motion controller. It moves text in
//! both directions and reports lifecycle events; all protocol decisions
//! live in [`crate::session`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Streamer       │                              │  Controller     │
//! │                 │         WebSocket            │  (ESP32/GRBL)   │
//! │  Session        │─────────────────────────────►│                 │
//! │  → Connection   │◄─────────────────────────────│  WebSocket      │
//! │                 │        ws://host:81          │  server         │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::open` - spawn the event loop and start connecting
//! 2. `ChannelEventKind::Open` - socket ready, handshake may begin
//! 3. `Connection::send` / `ChannelEventKind::Message` - one line each way
//! 4. `Connection::close` - close once; `ChannelEventKind::Closed` follows
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `endpoint` | Controller address parsing |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Controller endpoint addresses.
pub mod endpoint;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ChannelEvent, ChannelEventKind, Connection, EventSender};
pub use endpoint::{DEFAULT_PORT, Endpoint};
