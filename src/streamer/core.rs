//! Streamer task: runs one session at a time against a live connection.
//!
//! [`Streamer::spawn`] starts a tokio task that owns the active
//! [`Session`], its [`Connection`], its timer slot and its liveness tick.
//! The task is driven by four event sources:
//!
//! - Owner commands (start, cancel, shutdown) from [`StreamerHandle`]
//! - Channel events from the connection
//! - The session's single deferred timer (retry, settle, homing timeout)
//! - The periodic liveness tick
//!
//! All deferred state belongs to the active session and is dropped with
//! it, so nothing scheduled by a finished session can fire later.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, TimerToken};
use crate::program::Program;
use crate::session::observer::dispatch;
use crate::session::{Action, Input, Session, TransferObserver, TransferOutcome};
use crate::transport::{ChannelEvent, ChannelEventKind, Connection};

use super::builder::StreamerBuilder;
use super::config::StreamConfig;

// ============================================================================
// Streamer
// ============================================================================

/// Configured factory for streamer tasks.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sandtable_streamer::{ChannelObserver, Program, Streamer};
///
/// # async fn example() -> sandtable_streamer::Result<()> {
/// let streamer = Streamer::builder().host("10.0.0.42").build()?;
/// let (observer, mut events) = ChannelObserver::new();
/// let handle = streamer.spawn(Arc::new(observer));
///
/// let transfer = handle.start(Program::from_text("G28\nG1 X10 Y10"))?;
/// let outcome = transfer.outcome().await?;
/// println!("{:?}", outcome.status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Streamer {
    config: Arc<StreamConfig>,
}

impl Streamer {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> StreamerBuilder {
        StreamerBuilder::new()
    }

    /// Creates a streamer from a validated configuration.
    pub(crate) fn new(config: StreamConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Spawns the streamer task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(&self, observer: Arc<dyn TransferObserver>) -> StreamerHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = StreamerTask {
            config: Arc::clone(&self.config),
            observer,
            command_rx,
            events_tx,
            events_rx,
            active: None,
        };

        let join = tokio::spawn(task.run());
        debug!(endpoint = %self.config.endpoint, "Streamer task spawned");

        StreamerHandle { command_tx, join }
    }
}

// ============================================================================
// StreamerHandle
// ============================================================================

/// Commands from the handle to the task.
enum StreamerCommand {
    Start {
        session: SessionId,
        program: Program,
        outcome_tx: oneshot::Sender<TransferOutcome>,
    },
    Cancel,
    Shutdown,
}

/// Control handle for a running streamer task.
///
/// Dropping the handle cancels any active transfer and stops the task.
pub struct StreamerHandle {
    command_tx: mpsc::UnboundedSender<StreamerCommand>,
    join: JoinHandle<()>,
}

impl StreamerHandle {
    /// Starts a transfer of `program`.
    ///
    /// Any transfer already running is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamerClosed`] if the task has stopped.
    pub fn start(&self, program: Program) -> Result<Transfer> {
        let session = SessionId::generate();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        self.command_tx
            .send(StreamerCommand::Start {
                session,
                program,
                outcome_tx,
            })
            .map_err(|_| Error::StreamerClosed)?;

        Ok(Transfer {
            session,
            outcome_rx,
        })
    }

    /// Cancels the active transfer, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamerClosed`] if the task has stopped.
    pub fn cancel(&self) -> Result<()> {
        self.command_tx
            .send(StreamerCommand::Cancel)
            .map_err(|_| Error::StreamerClosed)
    }

    /// Returns `true` while the task is running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Cancels any active transfer and waits for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(StreamerCommand::Shutdown);
        if let Err(e) = self.join.await {
            warn!(error = %e, "Streamer task ended abnormally");
        }
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// A started transfer.
#[derive(Debug)]
pub struct Transfer {
    session: SessionId,
    outcome_rx: oneshot::Receiver<TransferOutcome>,
}

impl Transfer {
    /// Returns the session id of this transfer.
    #[inline]
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session
    }

    /// Waits for the transfer to end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the streamer task stopped without
    /// reporting an outcome.
    pub async fn outcome(self) -> Result<TransferOutcome> {
        Ok(self.outcome_rx.await?)
    }
}

// ============================================================================
// StreamerTask
// ============================================================================

/// The active session plus everything tied to its lifetime.
struct ActiveSession {
    session: Session,
    connection: Connection,
    timer: Option<(Instant, TimerToken)>,
    next_tick: Option<Instant>,
    outcome_tx: Option<oneshot::Sender<TransferOutcome>>,
}

struct StreamerTask {
    config: Arc<StreamConfig>,
    observer: Arc<dyn TransferObserver>,
    command_rx: mpsc::UnboundedReceiver<StreamerCommand>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    active: Option<ActiveSession>,
}

impl StreamerTask {
    async fn run(mut self) {
        loop {
            let timer = self.active.as_ref().and_then(|a| a.timer);
            let tick = self.active.as_ref().and_then(|a| a.next_tick);

            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(StreamerCommand::Start { session, program, outcome_tx }) => {
                        self.start(session, program, outcome_tx);
                    }
                    Some(StreamerCommand::Cancel) => self.feed(Input::Cancel),
                    Some(StreamerCommand::Shutdown) | None => {
                        self.feed(Input::Cancel);
                        break;
                    }
                },

                Some(event) = self.events_rx.recv() => self.on_channel_event(event),

                () = sleep_until_opt(timer.map(|(at, _)| at)) => {
                    if let Some((_, token)) = timer {
                        if let Some(active) = self.active.as_mut() {
                            active.timer = None;
                        }
                        self.feed(Input::Timer(token));
                    }
                }

                () = sleep_until_opt(tick) => {
                    if let Some(active) = self.active.as_mut() {
                        active.next_tick = Some(Instant::now() + self.config.keepalive_period);
                    }
                    self.feed(Input::LivenessTick);
                }
            }
        }

        debug!("Streamer task terminated");
    }

    /// Tears down any active session, then starts a new one.
    fn start(
        &mut self,
        session: SessionId,
        program: Program,
        outcome_tx: oneshot::Sender<TransferOutcome>,
    ) {
        if let Some(active) = &self.active {
            info!(
                previous = %active.session.id(),
                next = %session,
                "New transfer requested, cancelling the active one"
            );
            self.feed(Input::Cancel);
        }

        let mut machine = Session::new(session, program, &self.config);
        let actions = machine.start();

        let connection = Connection::open(
            &self.config.endpoint,
            session,
            self.config.connect_timeout,
            self.events_tx.clone(),
        );

        self.active = Some(ActiveSession {
            session: machine,
            connection,
            timer: None,
            next_tick: None,
            outcome_tx: Some(outcome_tx),
        });

        self.apply(actions, Instant::now());
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        let current = self.active.as_ref().map(|a| a.session.id());
        if current != Some(event.session) {
            trace!(session = %event.session, ?current, "event from stale connection ignored");
            return;
        }

        match &event.kind {
            ChannelEventKind::Open => self.feed(Input::Opened),
            ChannelEventKind::Message(text) => self.feed(Input::Message(text)),
            ChannelEventKind::Closed { reason } => self.feed(Input::Closed(reason.as_deref())),
        }
    }

    /// Runs one input through the active session and applies the result.
    fn feed(&mut self, input: Input<'_>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let now = Instant::now();
        let actions = active.session.handle(input, now);
        self.apply(actions, now);
    }

    fn apply(&mut self, actions: Vec<Action>, now: Instant) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let mut finished = false;

        for action in actions {
            match action {
                Action::Send(text) => {
                    if let Err(e) = active.connection.send(text) {
                        warn!(session = %active.session.id(), error = %e, "Send on closed channel");
                    }
                }
                Action::Schedule { token, delay } => active.timer = Some((now + delay, token)),
                Action::ClearTimer => active.timer = None,
                Action::StartLiveness => {
                    if active.next_tick.is_none() {
                        active.next_tick = Some(now + self.config.keepalive_period);
                    }
                }
                Action::StopLiveness => active.next_tick = None,
                Action::Close => active.connection.close(),
                Action::Notify(event) => dispatch(self.observer.as_ref(), &event),
                Action::Finish(outcome) => {
                    if let Some(tx) = active.outcome_tx.take() {
                        // Owner may have dropped the Transfer.
                        let _ = tx.send(outcome);
                    }
                    finished = true;
                }
            }
        }

        if finished {
            self.active = None;
        }
    }
}

/// Sleeps until `at`, or forever if `None`.
async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
