//! WebSocket connection to the controller.
//!
//! A [`Connection`] is a thin duplex text channel: it connects, sends text
//! messages verbatim and reports what happens as [`ChannelEvent`]s. It has
//! no protocol knowledge, no retry and no buffering.
//!
//! # Event Loop
//!
//! [`Connection::open`] spawns a tokio task that:
//!
//! - Connects to the endpoint (with timeout)
//! - Emits `Open`, then one `Message` per inbound text frame
//! - Writes outgoing text from [`Connection::send`]
//! - Emits `Closed` exactly once when the socket ends for any reason
//!
//! Every event carries the [`SessionId`] the connection was opened for, so
//! the owner can discard events from a connection it has already dropped.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

use super::Endpoint;

// ============================================================================
// ChannelEvent
// ============================================================================

/// Lifecycle notification from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEventKind {
    /// Socket connected.
    Open,
    /// Text frame received.
    Message(String),
    /// Socket ended, or never connected.
    Closed {
        /// Failure description; `None` for an orderly close.
        reason: Option<String>,
    },
}

/// A [`ChannelEventKind`] tagged with its owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Session the connection belongs to.
    pub session: SessionId,
    /// What happened.
    pub kind: ChannelEventKind,
}

/// Sink for channel events.
pub type EventSender = mpsc::UnboundedSender<ChannelEvent>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write one text frame.
    Send(String),
    /// Close the socket.
    Close,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to one controller connection.
///
/// Owned by exactly one session. Dropping it closes the socket.
pub struct Connection {
    session: SessionId,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    open: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl Connection {
    /// Starts connecting to `endpoint`.
    ///
    /// Returns immediately; the outcome arrives on `events` as `Open` or
    /// `Closed`.
    #[must_use]
    pub fn open(
        endpoint: &Endpoint,
        session: SessionId,
        connect_timeout: Duration,
        events: EventSender,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::run_event_loop(
            endpoint.clone(),
            session,
            connect_timeout,
            command_rx,
            events,
            Arc::clone(&open),
        ));

        Self {
            session,
            command_tx,
            open,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns `true` between `Open` and `Closed`.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    /// Sends one text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket is not open. The
    /// message is dropped.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        self.command_tx
            .send(ConnectionCommand::Send(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the socket. Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(session = %self.session, "Closing connection");
        let _ = self.command_tx.send(ConnectionCommand::Close);
    }

    /// Connects, then pumps frames until either side closes.
    async fn run_event_loop(
        endpoint: Endpoint,
        session: SessionId,
        connect_timeout: Duration,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        events: EventSender,
        open: Arc<AtomicBool>,
    ) {
        let emit = |kind: ChannelEventKind| {
            // Owner gone means nobody cares about this connection any more.
            let _ = events.send(ChannelEvent { session, kind });
        };

        let connect = timeout(connect_timeout, connect_async(endpoint.url().as_str()));

        let ws_stream = tokio::select! {
            result = connect => match result {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    warn!(%session, %endpoint, error = %e, "WebSocket connect failed");
                    emit(ChannelEventKind::Closed {
                        reason: Some(Error::from(e).to_string()),
                    });
                    return;
                }
                Err(_) => {
                    let err = Error::connection_timeout(connect_timeout.as_millis() as u64);
                    warn!(%session, %endpoint, "WebSocket connect timed out");
                    emit(ChannelEventKind::Closed {
                        reason: Some(err.to_string()),
                    });
                    return;
                }
            },

            // Closed before the socket came up.
            _ = Self::wait_for_close(&mut command_rx) => {
                debug!(%session, "Connection closed while connecting");
                emit(ChannelEventKind::Closed { reason: None });
                return;
            }
        };

        debug!(%session, %endpoint, "WebSocket connected");
        open.store(true, Ordering::Release);
        emit(ChannelEventKind::Open);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut reason = None;

        loop {
            tokio::select! {
                // Incoming frames from the controller
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(%session, text = text.as_str(), "Received");
                            emit(ChannelEventKind::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(%session, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(%session, error = %e, "WebSocket error");
                            reason = Some(e.to_string());
                            break;
                        }

                        None => {
                            debug!(%session, "WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong, Frame
                        _ => {}
                    }
                }

                // Commands from the owner
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(text)) => {
                            trace!(%session, text = text.as_str(), "Sending");
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(%session, error = %e, "Failed to send message");
                                reason = Some(e.to_string());
                                break;
                            }
                        }

                        Some(ConnectionCommand::Close) => {
                            debug!(%session, "Close command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!(%session, "Connection handle dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        open.store(false, Ordering::Release);
        emit(ChannelEventKind::Closed { reason });

        debug!(%session, "Event loop terminated");
    }

    /// Resolves once a close is requested or the handle is dropped.
    ///
    /// Sends queued before the socket opened are discarded.
    async fn wait_for_close(command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>) {
        while let Some(command) = command_rx.recv().await {
            if matches!(command, ConnectionCommand::Close) {
                return;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
