//! Streamer: the public entry point for sending programs to a controller.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Streamer`] | Configured factory for streamer tasks |
//! | [`StreamerBuilder`] | Fluent configuration builder |
//! | [`StreamConfig`] | Endpoint and timing configuration |
//! | [`StreamerHandle`] | Start/cancel/shutdown control |
//! | [`Transfer`] | One started transfer and its outcome |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sandtable_streamer::{NoopObserver, Program, Result, Streamer};
//!
//! # async fn example() -> Result<()> {
//! let streamer = Streamer::builder().endpoint("ws://10.0.0.42:81").build()?;
//! let handle = streamer.spawn(Arc::new(NoopObserver));
//!
//! let outcome = handle
//!     .start(Program::from_path("pattern.gcode")?)?
//!     .outcome()
//!     .await?;
//! assert!(outcome.is_completed());
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for streamer configuration.
pub mod builder;

/// Endpoint and timing configuration.
pub mod config;

/// Streamer task and handles.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::StreamerBuilder;
pub use config::StreamConfig;
pub use core::{Streamer, StreamerHandle, Transfer};
