//! Sand table streamer - G-code streaming over WebSocket.
//!
//! This library sends a program of G-code lines to a GRBL-style motion
//! controller (for example an ESP32 bridge in front of a kinetic sand
//! table) one line at a time, waiting for each acknowledgment before
//! releasing the next.
//!
//! # Architecture
//!
//! The streamer is split into a pure state machine and a thin async shell:
//!
//! - **Session (sans-IO)**: consumes inputs, returns actions; no sockets, no clocks
//! - **Streamer task (tokio)**: owns the connection, the timer slot and the
//!   liveness tick, and feeds events into the session
//!
//! Key design principles:
//!
//! - Stop-and-wait: at most one line in flight
//! - Each transfer owns one connection; events are tagged with its [`SessionId`]
//! - Deferred timers carry a token so a stale firing is a no-op
//! - A fatal reply ends the transfer; it is never retried
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sandtable_streamer::{ChannelObserver, Program, Result, Streamer, TransferEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let streamer = Streamer::builder().host("10.0.0.42").build()?;
//!
//!     let (observer, mut events) = ChannelObserver::new();
//!     let handle = streamer.spawn(Arc::new(observer));
//!
//!     let transfer = handle.start(Program::from_path("spiral.gcode")?)?;
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             if let TransferEvent::Progress { percent } = event {
//!                 println!("{percent}%");
//!             }
//!         }
//!     });
//!
//!     let outcome = transfer.outcome().await?;
//!     println!("{:?} after {} lines", outcome.status, outcome.lines_sent);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`streamer`] | Public entry point: [`Streamer`], [`StreamerHandle`], [`Transfer`] |
//! | [`session`] | Command pump state machine and observers |
//! | [`program`] | Program loading and vertex conversion |
//! | [`protocol`] | Line and reply vocabulary |
//! | [`transport`] | WebSocket connection (internal) |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Session and timer identifiers |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Session and timer identifiers.
pub mod identifiers;

/// Programs: ordered G-code lines.
pub mod program;

/// Controller line and reply vocabulary.
pub mod protocol;

/// Command pump state machine, retry policy, liveness and observers.
pub mod session;

/// Streamer configuration, task and handles.
///
/// Use [`Streamer::builder()`] to create a configured streamer.
pub mod streamer;

/// WebSocket transport layer.
///
/// Internal module handling the controller connection.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{SessionId, TimerToken};

// Program types
pub use program::{PlotOptions, Program, Vertex};

// Protocol types
pub use protocol::{CommandLine, HANDSHAKE_PROBE, KEEPALIVE_LINE, Reply};

// Session types
pub use session::{
    AbortReason, ChannelObserver, NoopObserver, RetryPolicy, SnapshotObserver, TransferEvent,
    TransferObserver, TransferOutcome, TransferSnapshot, TransferStatus,
};

// Streamer types
pub use streamer::{StreamConfig, Streamer, StreamerBuilder, StreamerHandle, Transfer};

// Transport types
pub use transport::Endpoint;
