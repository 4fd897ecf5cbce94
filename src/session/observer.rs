//! Notifications from a transfer to its owner.
//!
//! A transfer reports through exactly four notifications: progress
//! percentage, line counter, human-readable message and the sending flag.
//! Implement [`TransferObserver`] to receive them as callbacks, or use
//! [`ChannelObserver`] / [`SnapshotObserver`] to consume them as a stream
//! or poll them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

// ============================================================================
// TransferEvent
// ============================================================================

/// One notification emitted by a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Percentage of lines released to the controller.
    Progress {
        /// 0..=100.
        percent: u8,
    },
    /// Lines released so far out of the total.
    LineInfo {
        /// Lines released.
        current: usize,
        /// Lines in the program.
        total: usize,
    },
    /// Human-readable status text.
    Message {
        /// The text.
        text: String,
    },
    /// Whether a transfer is in progress.
    SendingChanged {
        /// New state.
        sending: bool,
    },
}

impl TransferEvent {
    pub(crate) fn message(text: impl Into<String>) -> Self {
        Self::Message { text: text.into() }
    }
}

// ============================================================================
// TransferObserver
// ============================================================================

/// Receives transfer notifications.
///
/// Callbacks run on the streamer task and must not block.
pub trait TransferObserver: Send + Sync {
    /// Progress changed.
    fn on_progress(&self, _percent: u8) {}

    /// Line counter changed.
    fn on_line_info(&self, _current: usize, _total: usize) {}

    /// Status text for the user.
    fn on_message(&self, _message: &str) {}

    /// A transfer started or stopped.
    fn on_sending_changed(&self, _sending: bool) {}
}

/// Routes an event to the matching callback.
pub(crate) fn dispatch(observer: &dyn TransferObserver, event: &TransferEvent) {
    match event {
        TransferEvent::Progress { percent } => observer.on_progress(*percent),
        TransferEvent::LineInfo { current, total } => observer.on_line_info(*current, *total),
        TransferEvent::Message { text } => observer.on_message(text),
        TransferEvent::SendingChanged { sending } => observer.on_sending_changed(*sending),
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

// ============================================================================
// ChannelObserver
// ============================================================================

/// Forwards every notification into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelObserver {
    /// Creates the observer and the receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: TransferEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl TransferObserver for ChannelObserver {
    fn on_progress(&self, percent: u8) {
        self.forward(TransferEvent::Progress { percent });
    }

    fn on_line_info(&self, current: usize, total: usize) {
        self.forward(TransferEvent::LineInfo { current, total });
    }

    fn on_message(&self, message: &str) {
        self.forward(TransferEvent::message(message));
    }

    fn on_sending_changed(&self, sending: bool) {
        self.forward(TransferEvent::SendingChanged { sending });
    }
}

// ============================================================================
// SnapshotObserver
// ============================================================================

/// Latest known state of a transfer, for UIs that poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferSnapshot {
    /// Whether a transfer is running.
    pub sending: bool,
    /// Last reported percentage.
    pub progress: u8,
    /// Lines released.
    pub current: usize,
    /// Lines in the program.
    pub total: usize,
    /// Last status text.
    pub last_message: Option<String>,
}

/// Keeps a [`TransferSnapshot`] up to date.
#[derive(Debug, Default)]
pub struct SnapshotObserver {
    state: RwLock<TransferSnapshot>,
}

impl SnapshotObserver {
    /// Creates an observer with an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TransferSnapshot {
        self.state.read().clone()
    }
}

impl TransferObserver for SnapshotObserver {
    fn on_progress(&self, percent: u8) {
        self.state.write().progress = percent;
    }

    fn on_line_info(&self, current: usize, total: usize) {
        let mut state = self.state.write();
        state.current = current;
        state.total = total;
    }

    fn on_message(&self, message: &str) {
        self.state.write().last_message = Some(message.to_string());
    }

    fn on_sending_changed(&self, sending: bool) {
        self.state.write().sending = sending;
    }
}

// ============================================================================
// TransferOutcome
// ============================================================================

/// Why a transfer was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// Controller replied `error:<detail>`.
    ControllerError(String),
    /// Controller replied `alarm:<detail>`.
    Alarm(String),
    /// Controller replied `timeout`.
    Timeout,
    /// Too many consecutive `busy` replies.
    TooBusy,
    /// Controller replied `homing_failed`.
    HomingFailed,
    /// Homing did not finish in time.
    HomingTimedOut,
    /// Connection failed or was closed by the controller.
    ConnectionLost(Option<String>),
}

impl AbortReason {
    /// Detail text reported by the controller, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::ControllerError(detail) | Self::Alarm(detail) => Some(detail),
            Self::ConnectionLost(detail) => detail.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControllerError(detail) => write!(f, "GRBL Error: {detail}"),
            Self::Alarm(detail) => write!(f, "GRBL Alarm: {detail}"),
            Self::Timeout => f.write_str("Command timeout. Stopping transfer."),
            Self::TooBusy => f.write_str("Controller is too busy. Transfer stopped."),
            Self::HomingFailed => f.write_str("Homing failed. Please check the machine."),
            Self::HomingTimedOut => f.write_str("Homing timed out. Transfer stopped."),
            Self::ConnectionLost(Some(detail)) => write!(f, "Connection lost: {detail}"),
            Self::ConnectionLost(None) => f.write_str("Connection closed by controller."),
        }
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    /// Every line was acknowledged.
    Completed,
    /// A fatal condition ended the transfer.
    Aborted(AbortReason),
    /// The owner cancelled it.
    Cancelled,
}

/// Final report for one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    /// How the transfer ended.
    pub status: TransferStatus,
    /// Lines released to the controller before it ended.
    pub lines_sent: usize,
    /// Lines in the program.
    pub total: usize,
}

impl TransferOutcome {
    /// Returns `true` if every line was delivered.
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TransferStatus::Completed
    }
}

// ============================================================================
// Tests
// ============================================================================
