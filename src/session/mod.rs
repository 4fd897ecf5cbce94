//! Streaming session: state machine, retry policy, liveness and outcomes.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `machine` | Command pump state machine |
//! | `backoff` | Busy retry policy |
//! | `liveness` | Keepalive monitor |
//! | `observer` | Notifications and outcomes |

// ============================================================================
// Submodules
// ============================================================================

/// Busy-reply retry policy.
pub mod backoff;

/// Keepalive monitor.
pub mod liveness;

/// Command pump state machine.
pub mod machine;

/// Transfer notifications and outcomes.
pub mod observer;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::RetryPolicy;
pub use liveness::LivenessMonitor;
pub use machine::{Action, Flow, Input, Phase, Session};
pub use observer::{
    AbortReason, ChannelObserver, NoopObserver, SnapshotObserver, TransferEvent,
    TransferObserver, TransferOutcome, TransferSnapshot, TransferStatus,
};
