//! The command pump: one streaming session as an explicit state machine.
//!
//! The machine performs no I/O. Each [`Input`] (channel event, timer
//! expiry, liveness tick, cancel) is turned into a list of [`Action`]s that
//! the streamer task executes. This keeps every transition deterministic
//! and testable without sockets or real time.
//!
//! # States
//!
//! ```text
//! Idle ─start─► Connecting ─open─► AwaitingHandshake ─ok─► Streaming ─┬─► Completed
//!                                                                      └─► Aborted
//!
//! Streaming flows:
//!   AwaitingAck ─busy─► BackingOff ─timer─► AwaitingAck (resend same line)
//!   AwaitingAck ─homing_started─► Homing ─homing_complete─► Settling ─timer─► AwaitingAck
//! ```
//!
//! # Cursor
//!
//! `cursor` counts lines released to the controller. The handshake `ok`,
//! each command `ok` and the settle timer release line `cursor` and then
//! increment it, so the line awaiting its reply is always `cursor - 1`.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::identifiers::{SessionId, TimerToken};
use crate::program::Program;
use crate::protocol::{HANDSHAKE_PROBE, KEEPALIVE_LINE, Reply};
use crate::streamer::StreamConfig;

use super::backoff::RetryPolicy;
use super::liveness::LivenessMonitor;
use super::observer::{AbortReason, TransferEvent, TransferOutcome, TransferStatus};

// ============================================================================
// Constants
// ============================================================================

const MSG_BUSY: &str = "Controller is busy. Retrying...";
const MSG_HOMING_STARTED: &str = "Homing started... Please wait.";
const MSG_HOMING_COMPLETE: &str = "Homing completed successfully!";
const MSG_COMPLETED: &str = "Transfer complete.";
const MSG_CANCELLED: &str = "Transfer cancelled.";

// ============================================================================
// Phase
// ============================================================================

/// Top-level session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not started.
    Idle,
    /// Waiting for the channel to open.
    Connecting,
    /// Probe sent, waiting for `ok`.
    AwaitingHandshake,
    /// Handshake done; lines are flowing.
    Streaming(Flow),
    /// Every line acknowledged.
    Completed,
    /// Ended by a fatal reply, a lost connection or cancellation.
    Aborted,
}

impl Phase {
    /// Returns `true` for `Completed` and `Aborted`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Sub-state while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Line `cursor - 1` is in flight.
    AwaitingAck,
    /// Controller was busy; resend scheduled under this token.
    BackingOff(TimerToken),
    /// Controller is homing; optional timeout token.
    Homing(Option<TimerToken>),
    /// Homing finished; next line released when this token fires.
    Settling(TimerToken),
}

// ============================================================================
// Input / Action
// ============================================================================

/// Something that happened to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    /// Channel opened.
    Opened,
    /// Text received from the controller.
    Message(&'a str),
    /// Channel closed or failed to open.
    Closed(Option<&'a str>),
    /// A timer scheduled by [`Action::Schedule`] expired.
    Timer(TimerToken),
    /// Periodic liveness check.
    LivenessTick,
    /// Owner asked to stop.
    Cancel,
}

/// Something the streamer task must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send text on the channel.
    Send(String),
    /// Arm the session's timer slot, replacing whatever was armed.
    Schedule {
        /// Token delivered back as [`Input::Timer`].
        token: TimerToken,
        /// Delay from now.
        delay: Duration,
    },
    /// Disarm the timer slot.
    ClearTimer,
    /// Begin periodic liveness ticks.
    StartLiveness,
    /// Stop liveness ticks.
    StopLiveness,
    /// Close the channel.
    Close,
    /// Notify the observer.
    Notify(TransferEvent),
    /// The session ended.
    Finish(TransferOutcome),
}

// ============================================================================
// Session
// ============================================================================

/// State of one streaming attempt.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    program: Program,
    cursor: usize,
    retries: u32,
    phase: Phase,
    liveness: LivenessMonitor,
    retry_policy: RetryPolicy,
    settle_delay: Duration,
    homing_timeout: Option<Duration>,
    next_token: TimerToken,
    last_progress: Option<u8>,
    actions: Vec<Action>,
}

impl Session {
    /// Creates an idle session for `program`.
    #[must_use]
    pub fn new(id: SessionId, program: Program, config: &StreamConfig) -> Self {
        Self {
            id,
            program,
            cursor: 0,
            retries: 0,
            phase: Phase::Idle,
            liveness: LivenessMonitor::new(config.keepalive_threshold),
            retry_policy: config.retry,
            settle_delay: config.settle_delay,
            homing_timeout: config.homing_timeout,
            next_token: TimerToken::FIRST,
            last_progress: None,
            actions: Vec::new(),
        }
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the current phase.
    #[inline]
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the number of lines released.
    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the consecutive `busy` count.
    #[inline]
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Returns the number of lines in the program.
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.program.len()
    }

    /// Returns `true` once completed or aborted.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Moves from `Idle` to `Connecting`.
    ///
    /// The caller opens the channel after this.
    pub fn start(&mut self) -> Vec<Action> {
        if self.phase != Phase::Idle {
            warn!(session = %self.id, phase = ?self.phase, "start ignored");
            return Vec::new();
        }

        info!(session = %self.id, total = self.total(), "Transfer starting");

        self.cursor = 0;
        self.retries = 0;
        self.phase = Phase::Connecting;
        self.last_progress = Some(0);

        self.notify(TransferEvent::SendingChanged { sending: true });
        self.notify(TransferEvent::Progress { percent: 0 });
        self.notify(TransferEvent::LineInfo {
            current: 0,
            total: self.total(),
        });

        self.take_actions()
    }

    /// Feeds one input into the machine.
    pub fn handle(&mut self, input: Input<'_>, now: Instant) -> Vec<Action> {
        if self.phase.is_terminal() {
            trace!(session = %self.id, ?input, "input after session end ignored");
            return Vec::new();
        }

        match input {
            Input::Opened => self.on_opened(),
            Input::Message(text) => self.on_message(text, now),
            Input::Closed(reason) => self.on_closed(reason),
            Input::Timer(token) => self.on_timer(token, now),
            Input::LivenessTick => self.on_liveness_tick(now),
            Input::Cancel => self.on_cancel(),
        }

        self.take_actions()
    }
}

// ============================================================================
// Session - Transitions
// ============================================================================

impl Session {
    fn on_opened(&mut self) {
        if self.phase != Phase::Connecting {
            warn!(session = %self.id, phase = ?self.phase, "unexpected open event");
            return;
        }

        debug!(session = %self.id, "Channel open, sending handshake probe");
        self.phase = Phase::AwaitingHandshake;
        self.send(HANDSHAKE_PROBE.to_string());
    }

    fn on_message(&mut self, text: &str, now: Instant) {
        let flow = match self.phase {
            Phase::AwaitingHandshake => {
                self.on_handshake_reply(Reply::classify(text, false), now);
                return;
            }
            Phase::Streaming(flow) => flow,
            phase => {
                warn!(session = %self.id, ?phase, text, "reply before handshake probe ignored");
                return;
            }
        };

        let reply = Reply::classify(text, true);
        trace!(session = %self.id, ?reply, ?flow, "reply");

        match reply {
            Reply::HandshakeAck | Reply::CommandAck => self.on_ack(flow, now),
            Reply::Busy => self.on_busy(flow),
            Reply::HomingStarted => self.on_homing_started(flow),
            Reply::HomingComplete => self.on_homing_complete(flow, now),
            Reply::HomingFailed => self.abort(AbortReason::HomingFailed),
            Reply::Error(detail) => self.abort(AbortReason::ControllerError(detail)),
            Reply::Alarm(detail) => self.abort(AbortReason::Alarm(detail)),
            Reply::Timeout => self.abort(AbortReason::Timeout),
            Reply::Status(detail) => self.forward_status(&detail),
            Reply::Unrecognized(text) => self.forward_unrecognized(text),
        }
    }

    fn on_handshake_reply(&mut self, reply: Reply, now: Instant) {
        match reply {
            Reply::HandshakeAck | Reply::CommandAck => self.begin_streaming(now),
            Reply::Busy => {
                // Nothing to resend yet; the probe stays outstanding.
                self.retries += 1;
                if self.retry_policy.is_exhausted(self.retries) {
                    self.abort(AbortReason::TooBusy);
                } else {
                    self.notify(TransferEvent::message(MSG_BUSY));
                }
            }
            Reply::HomingFailed => self.abort(AbortReason::HomingFailed),
            Reply::Error(detail) => self.abort(AbortReason::ControllerError(detail)),
            Reply::Alarm(detail) => self.abort(AbortReason::Alarm(detail)),
            Reply::Timeout => self.abort(AbortReason::Timeout),
            Reply::Status(detail) => self.forward_status(&detail),
            Reply::Unrecognized(text) => self.forward_unrecognized(text),
            Reply::HomingStarted | Reply::HomingComplete => {
                debug!(session = %self.id, ?reply, "homing event before handshake ignored");
            }
        }
    }

    fn begin_streaming(&mut self, now: Instant) {
        debug!(session = %self.id, "Handshake confirmed");

        self.retries = 0;
        self.phase = Phase::Streaming(Flow::AwaitingAck);

        if self.liveness.start(now) {
            self.actions.push(Action::StartLiveness);
        }

        self.release_next(now);
    }

    fn on_ack(&mut self, flow: Flow, now: Instant) {
        if flow != Flow::AwaitingAck {
            debug!(session = %self.id, ?flow, "ok with no line in flight ignored");
            return;
        }

        self.retries = 0;
        self.liveness.touch(now);
        self.release_next(now);
    }

    fn on_busy(&mut self, flow: Flow) {
        if flow != Flow::AwaitingAck {
            debug!(session = %self.id, ?flow, "busy with no line in flight ignored");
            return;
        }

        self.retries += 1;
        if self.retry_policy.is_exhausted(self.retries) {
            warn!(session = %self.id, retries = self.retries, "Controller stayed busy");
            self.abort(AbortReason::TooBusy);
            return;
        }

        let delay = self.retry_policy.delay(self.retries);
        let token = self.issue_token();
        debug!(session = %self.id, attempt = self.retries, ?delay, "Controller busy, backing off");

        self.phase = Phase::Streaming(Flow::BackingOff(token));
        self.actions.push(Action::Schedule { token, delay });
        self.notify(TransferEvent::message(MSG_BUSY));
    }

    fn on_homing_started(&mut self, flow: Flow) {
        if !matches!(flow, Flow::AwaitingAck | Flow::BackingOff(_)) {
            debug!(session = %self.id, ?flow, "duplicate homing_started ignored");
            return;
        }

        info!(session = %self.id, "Controller homing");

        let timeout = match self.homing_timeout {
            Some(delay) => {
                let token = self.issue_token();
                self.actions.push(Action::Schedule { token, delay });
                Some(token)
            }
            None => {
                self.actions.push(Action::ClearTimer);
                None
            }
        };

        self.phase = Phase::Streaming(Flow::Homing(timeout));
        self.notify(TransferEvent::message(MSG_HOMING_STARTED));
    }

    fn on_homing_complete(&mut self, flow: Flow, now: Instant) {
        if !matches!(flow, Flow::Homing(_)) {
            debug!(session = %self.id, ?flow, "homing_complete outside homing ignored");
            return;
        }

        info!(session = %self.id, settle = ?self.settle_delay, "Homing complete, settling");

        self.liveness.touch(now);
        let token = self.issue_token();
        self.phase = Phase::Streaming(Flow::Settling(token));
        self.actions.push(Action::Schedule {
            token,
            delay: self.settle_delay,
        });
        self.notify(TransferEvent::message(MSG_HOMING_COMPLETE));
    }

    fn on_timer(&mut self, token: TimerToken, now: Instant) {
        match self.phase {
            Phase::Streaming(Flow::BackingOff(armed)) if armed == token => self.resend(now),
            Phase::Streaming(Flow::Settling(armed)) if armed == token => {
                debug!(session = %self.id, "Settle delay elapsed");
                self.liveness.touch(now);
                self.release_next(now);
            }
            Phase::Streaming(Flow::Homing(Some(armed))) if armed == token => {
                self.abort(AbortReason::HomingTimedOut);
            }
            phase => trace!(session = %self.id, %token, ?phase, "stale timer ignored"),
        }
    }

    fn on_liveness_tick(&mut self, now: Instant) {
        if matches!(self.phase, Phase::Streaming(_)) && self.liveness.tick(now) {
            debug!(session = %self.id, "Idle too long, sending keepalive");
            self.send(KEEPALIVE_LINE.to_string());
        }
    }

    fn on_closed(&mut self, reason: Option<&str>) {
        warn!(session = %self.id, reason, "Channel closed mid-transfer");
        self.abort(AbortReason::ConnectionLost(reason.map(str::to_string)));
    }

    fn on_cancel(&mut self) {
        if self.phase == Phase::Idle {
            return;
        }
        info!(session = %self.id, cursor = self.cursor, "Transfer cancelled");
        self.finish(TransferStatus::Cancelled);
    }
}

// ============================================================================
// Session - Helpers
// ============================================================================

impl Session {
    /// Sends line `cursor` and advances, or completes if none remain.
    fn release_next(&mut self, now: Instant) {
        let Some(line) = self.program.get(self.cursor) else {
            self.finish(TransferStatus::Completed);
            return;
        };

        trace!(
            session = %self.id,
            line = self.cursor + 1,
            total = self.total(),
            text = line.as_str(),
            "Sending line"
        );

        let text = line.as_str().to_string();
        self.send(text);
        self.liveness.touch(now);
        self.cursor += 1;
        self.phase = Phase::Streaming(Flow::AwaitingAck);
        self.report_progress();
    }

    /// Resends the line still awaiting its reply.
    fn resend(&mut self, now: Instant) {
        let in_flight = self
            .cursor
            .checked_sub(1)
            .and_then(|index| self.program.get(index))
            .map(|line| line.as_str().to_string());

        let Some(text) = in_flight else {
            warn!(session = %self.id, cursor = self.cursor, "retry with no line in flight");
            self.phase = Phase::Streaming(Flow::AwaitingAck);
            return;
        };

        debug!(session = %self.id, attempt = self.retries, line = self.cursor, "Resending line");
        self.send(text);
        self.liveness.touch(now);
        self.phase = Phase::Streaming(Flow::AwaitingAck);
    }

    fn report_progress(&mut self) {
        let total = self.total();
        let percent = progress_percent(self.cursor, total);
        self.last_progress = Some(percent);
        self.notify(TransferEvent::Progress { percent });
        self.notify(TransferEvent::LineInfo {
            current: self.cursor,
            total,
        });
    }

    fn abort(&mut self, reason: AbortReason) {
        warn!(session = %self.id, cursor = self.cursor, %reason, "Transfer aborted");
        self.finish(TransferStatus::Aborted(reason));
    }

    /// Tears the session down and reports the outcome.
    fn finish(&mut self, status: TransferStatus) {
        self.liveness.stop();
        self.actions.push(Action::StopLiveness);
        self.actions.push(Action::ClearTimer);
        self.actions.push(Action::Close);

        let message = match &status {
            TransferStatus::Completed => {
                if self.last_progress != Some(100) {
                    self.notify(TransferEvent::Progress { percent: 100 });
                }
                info!(session = %self.id, lines = self.cursor, "Transfer complete");
                MSG_COMPLETED.to_string()
            }
            TransferStatus::Aborted(reason) => reason.to_string(),
            TransferStatus::Cancelled => MSG_CANCELLED.to_string(),
        };

        self.phase = if status == TransferStatus::Completed {
            Phase::Completed
        } else {
            Phase::Aborted
        };

        let outcome = TransferOutcome {
            status,
            lines_sent: self.cursor,
            total: self.total(),
        };

        self.notify(TransferEvent::message(message));
        self.notify(TransferEvent::SendingChanged { sending: false });
        self.actions.push(Action::Finish(outcome));

        self.cursor = 0;
        self.retries = 0;
    }

    fn issue_token(&mut self) -> TimerToken {
        let token = self.next_token;
        self.next_token = token.next();
        token
    }

    fn send(&mut self, text: String) {
        self.actions.push(Action::Send(text));
    }

    fn notify(&mut self, event: TransferEvent) {
        self.actions.push(Action::Notify(event));
    }

    fn forward_status(&mut self, detail: &str) {
        debug!(session = %self.id, detail, "Controller status");
        self.notify(TransferEvent::message(format!("Status: {detail}")));
    }

    fn forward_unrecognized(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        debug!(session = %self.id, text = text.as_str(), "Unrecognized reply");
        self.notify(TransferEvent::Message { text });
    }

    fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

/// `round(current / total * 100)`, or 100 for an empty program.
#[must_use]
pub fn progress_percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (current.min(total) as f64 / total as f64 * 100.0).round();
    percent as u8
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::transport::Endpoint;

    // ------------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------------

    fn config() -> StreamConfig {
        StreamConfig::new(Endpoint::new("127.0.0.1", 81).expect("valid endpoint"))
    }

    struct Harness {
        session: Session,
        now: Instant,
        log: Vec<Action>,
    }

    impl Harness {
        fn new(lines: &[&str]) -> Self {
            Self::with_config(lines, config())
        }

        fn with_config(lines: &[&str], config: StreamConfig) -> Self {
            let program = Program::new(lines.iter().copied());
            let mut session = Session::new(SessionId::generate(), program, &config);
            let log = session.start();
            Self {
                session,
                now: Instant::now(),
                log,
            }
        }

        fn feed(&mut self, input: Input<'_>) -> Vec<Action> {
            let actions = self.session.handle(input, self.now);
            self.log.extend(actions.iter().cloned());
            actions
        }

        fn reply(&mut self, text: &str) -> Vec<Action> {
            self.feed(Input::Message(text))
        }

        fn advance(&mut self, by: Duration) {
            self.now += by;
        }

        /// Opens the channel and completes the handshake.
        fn connect(&mut self) -> Vec<Action> {
            self.feed(Input::Opened);
            self.reply("ok")
        }

        fn sends(&self) -> Vec<String> {
            sends(&self.log)
        }

        fn progress(&self) -> Vec<u8> {
            self.log
                .iter()
                .filter_map(|a| match a {
                    Action::Notify(TransferEvent::Progress { percent }) => Some(*percent),
                    _ => None,
                })
                .collect()
        }

        fn messages(&self) -> Vec<String> {
            self.log
                .iter()
                .filter_map(|a| match a {
                    Action::Notify(TransferEvent::Message { text }) => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }

        fn closes(&self) -> usize {
            self.log.iter().filter(|a| **a == Action::Close).count()
        }

        fn outcome(&self) -> Option<&TransferOutcome> {
            self.log.iter().find_map(|a| match a {
                Action::Finish(outcome) => Some(outcome),
                _ => None,
            })
        }
    }

    fn sends(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn scheduled(actions: &[Action]) -> Option<(TimerToken, Duration)> {
        actions.iter().find_map(|a| match a {
            Action::Schedule { token, delay } => Some((*token, *delay)),
            _ => None,
        })
    }

    // ------------------------------------------------------------------------
    // Happy path
    // ------------------------------------------------------------------------

    #[test]
    fn test_start_reports_sending() {
        let h = Harness::new(&["G1 X0 Y0"]);
        assert_eq!(h.session.phase(), Phase::Connecting);
        assert_eq!(
            h.log,
            [
                Action::Notify(TransferEvent::SendingChanged { sending: true }),
                Action::Notify(TransferEvent::Progress { percent: 0 }),
                Action::Notify(TransferEvent::LineInfo { current: 0, total: 1 }),
            ]
        );
    }

    #[test]
    fn test_open_sends_probe() {
        let mut h = Harness::new(&["G1 X0 Y0"]);
        let actions = h.feed(Input::Opened);
        assert_eq!(sends(&actions), ["\r\n"]);
        assert_eq!(h.session.phase(), Phase::AwaitingHandshake);
    }

    #[test]
    fn test_two_line_transfer() {
        let mut h = Harness::new(&["G1 X0 Y0", "G1 X1 Y1"]);

        let actions = h.connect();
        assert!(actions.contains(&Action::StartLiveness));
        assert_eq!(sends(&actions), ["G1 X0 Y0"]);

        assert_eq!(sends(&h.reply("ok")), ["G1 X1 Y1"]);
        assert_eq!(h.session.cursor(), 2);

        let last = h.reply("ok");
        assert!(sends(&last).is_empty());
        assert_eq!(h.session.phase(), Phase::Completed);

        assert_eq!(h.sends(), ["\r\n", "G1 X0 Y0", "G1 X1 Y1"]);
        assert_eq!(h.progress(), [0, 50, 100]);
        assert_eq!(h.closes(), 1);

        let outcome = h.outcome().expect("finished");
        assert!(outcome.is_completed());
        assert_eq!((outcome.lines_sent, outcome.total), (2, 2));
        assert_eq!(
            last.last(),
            Some(&Action::Finish(outcome.clone())),
            "outcome is the final action"
        );
    }

    #[test]
    fn test_line_info_follows_cursor() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.connect();
        h.reply("ok");

        let infos: Vec<_> = h
            .log
            .iter()
            .filter_map(|a| match a {
                Action::Notify(TransferEvent::LineInfo { current, total }) => {
                    Some((*current, *total))
                }
                _ => None,
            })
            .collect();
        assert_eq!(infos, [(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_empty_program_completes_after_handshake() {
        let mut h = Harness::new(&[]);
        h.connect();

        assert_eq!(h.session.phase(), Phase::Completed);
        assert_eq!(h.sends(), ["\r\n"]);
        assert_eq!(h.progress(), [0, 100]);
        assert!(h.outcome().is_some_and(TransferOutcome::is_completed));
    }

    #[test]
    fn test_sending_false_is_reported_once_at_end() {
        let mut h = Harness::new(&["a"]);
        h.connect();
        h.reply("ok");

        let flags: Vec<bool> = h
            .log
            .iter()
            .filter_map(|a| match a {
                Action::Notify(TransferEvent::SendingChanged { sending }) => Some(*sending),
                _ => None,
            })
            .collect();
        assert_eq!(flags, [true, false]);
        assert_eq!(h.messages().last().map(String::as_str), Some(MSG_COMPLETED));
    }

    // ------------------------------------------------------------------------
    // Busy / backoff
    // ------------------------------------------------------------------------

    #[test]
    fn test_busy_three_times_then_ok() {
        let mut h = Harness::new(&["G1 X5 Y5"]);
        h.connect();

        let mut delays = Vec::new();
        for attempt in 1..=3 {
            let actions = h.reply("busy");
            let (token, delay) = scheduled(&actions).expect("retry scheduled");
            delays.push(delay.as_secs());

            assert_eq!(h.session.retries(), attempt);
            assert_eq!(h.session.cursor(), 1, "busy never advances the cursor");
            assert!(sends(&actions).is_empty());

            h.advance(delay);
            let resent = h.feed(Input::Timer(token));
            assert_eq!(sends(&resent), ["G1 X5 Y5"]);
        }
        assert_eq!(delays, [1, 2, 3]);

        h.reply("ok");
        assert_eq!(h.session.phase(), Phase::Completed);
        assert_eq!(h.sends(), ["\r\n", "G1 X5 Y5", "G1 X5 Y5", "G1 X5 Y5", "G1 X5 Y5"]);
        assert_eq!(h.outcome().map(|o| o.lines_sent), Some(1));
    }

    #[test]
    fn test_ok_resets_retry_counter() {
        let mut h = Harness::new(&["a", "b"]);
        h.connect();

        let (token, _) = scheduled(&h.reply("busy")).expect("retry scheduled");
        h.feed(Input::Timer(token));
        assert_eq!(h.session.retries(), 1);

        h.reply("ok");
        assert_eq!(h.session.retries(), 0);
        assert_eq!(h.session.cursor(), 2);
    }

    #[test]
    fn test_sixth_busy_aborts() {
        let mut h = Harness::new(&["a", "b"]);
        h.connect();

        for _ in 0..5 {
            let (token, _) = scheduled(&h.reply("busy")).expect("retry scheduled");
            h.feed(Input::Timer(token));
        }
        let sends_before = h.sends().len();

        let actions = h.reply("busy");
        assert!(scheduled(&actions).is_none());
        assert_eq!(h.session.phase(), Phase::Aborted);
        assert_eq!(
            h.outcome().map(|o| o.status.clone()),
            Some(TransferStatus::Aborted(AbortReason::TooBusy))
        );

        h.reply("ok");
        h.feed(Input::LivenessTick);
        assert_eq!(h.sends().len(), sends_before);
        assert_eq!(h.closes(), 1);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let mut h = Harness::new(&["a"]);
        h.connect();

        let mut last = Duration::ZERO;
        for _ in 0..5 {
            let (token, delay) = scheduled(&h.reply("busy")).expect("retry scheduled");
            last = delay;
            h.feed(Input::Timer(token));
        }
        assert_eq!(last, Duration::from_secs(5));
    }

    #[test]
    fn test_reply_during_backoff_is_ignored() {
        let mut h = Harness::new(&["a", "b"]);
        h.connect();
        let (token, _) = scheduled(&h.reply("busy")).expect("retry scheduled");

        assert!(h.reply("ok").is_empty());
        assert!(h.reply("busy").is_empty());
        assert_eq!(h.session.cursor(), 1);
        assert_eq!(h.session.retries(), 1);

        assert_eq!(sends(&h.feed(Input::Timer(token))), ["a"]);
    }

    #[test]
    fn test_retry_timer_fires_once() {
        let mut h = Harness::new(&["a"]);
        h.connect();
        let (token, _) = scheduled(&h.reply("busy")).expect("retry scheduled");

        assert_eq!(sends(&h.feed(Input::Timer(token))).len(), 1);
        assert!(h.feed(Input::Timer(token)).is_empty());
    }

    #[test]
    fn test_busy_during_handshake_counts_without_resend() {
        let mut h = Harness::new(&["a"]);
        h.feed(Input::Opened);

        let actions = h.reply("busy");
        assert!(sends(&actions).is_empty());
        assert!(scheduled(&actions).is_none());
        assert_eq!(h.session.retries(), 1);

        // Handshake ok clears the count.
        h.reply("ok");
        assert_eq!(h.session.retries(), 0);
        assert_eq!(h.sends(), ["\r\n", "a"]);
    }

    // ------------------------------------------------------------------------
    // Fatal replies
    // ------------------------------------------------------------------------

    #[test]
    fn test_alarm_aborts_with_detail() {
        let mut h = Harness::new(&["a", "b"]);
        h.connect();
        h.reply("alarm:hard limit");

        assert_eq!(h.session.phase(), Phase::Aborted);
        assert_eq!(h.closes(), 1);

        let outcome = h.outcome().expect("finished");
        let TransferStatus::Aborted(reason) = &outcome.status else {
            panic!("expected abort, got {:?}", outcome.status);
        };
        assert_eq!(reason.detail(), Some("hard limit"));
        assert!(h.messages().contains(&"GRBL Alarm: hard limit".to_string()));
        assert_eq!(outcome.lines_sent, 1);
    }

    #[test]
    fn test_error_and_timeout_abort() {
        for (reply, expected) in [
            ("error:22", AbortReason::ControllerError("22".into())),
            ("timeout", AbortReason::Timeout),
            ("homing_failed", AbortReason::HomingFailed),
        ] {
            let mut h = Harness::new(&["a", "b"]);
            h.connect();
            h.reply(reply);
            assert_eq!(
                h.outcome().map(|o| o.status.clone()),
                Some(TransferStatus::Aborted(expected))
            );
            assert_eq!(h.sends().len(), 2);
        }
    }

    #[test]
    fn test_error_during_handshake_aborts() {
        let mut h = Harness::new(&["a"]);
        h.feed(Input::Opened);
        h.reply("error:locked");
        assert_eq!(h.session.phase(), Phase::Aborted);
        assert_eq!(h.sends(), ["\r\n"]);
    }

    #[test]
    fn test_fatal_replies_during_handshake_map_reasons() {
        for (reply, expected) in [
            ("error:locked", AbortReason::ControllerError("locked".into())),
            ("ALARM:door open", AbortReason::Alarm("door open".into())),
            ("timeout", AbortReason::Timeout),
            ("homing_failed", AbortReason::HomingFailed),
        ] {
            let mut h = Harness::new(&["a"]);
            h.feed(Input::Opened);
            h.reply(reply);
            assert_eq!(
                h.outcome().map(|o| o.status.clone()),
                Some(TransferStatus::Aborted(expected)),
                "reply {reply:?}"
            );
            assert_eq!(h.sends(), ["\r\n"]);
            assert_eq!(h.closes(), 1);
        }
    }

    #[test]
    fn test_connection_lost_aborts() {
        let mut h = Harness::new(&["a", "b"]);
        h.connect();
        h.feed(Input::Closed(None));
        assert_eq!(
            h.outcome().map(|o| o.status.clone()),
            Some(TransferStatus::Aborted(AbortReason::ConnectionLost(None)))
        );
    }

    #[test]
    fn test_connect_failure_aborts() {
        let mut h = Harness::new(&["a"]);
        h.feed(Input::Closed(Some("connection refused")));
        assert_eq!(h.session.phase(), Phase::Aborted);
        assert!(h.sends().is_empty());
    }

    // ------------------------------------------------------------------------
    // Status / unrecognized
    // ------------------------------------------------------------------------

    #[test]
    fn test_status_is_forwarded_without_state_change() {
        let mut h = Harness::new(&["a", "b"]);
        h.connect();
        let actions = h.reply("status:Run|MPos:1,1");

        assert_eq!(
            actions,
            [Action::Notify(TransferEvent::message("Status: Run|MPos:1,1"))]
        );
        assert_eq!(h.session.cursor(), 1);
        assert_eq!(h.session.phase(), Phase::Streaming(Flow::AwaitingAck));
    }

    #[test]
    fn test_unrecognized_is_forwarded() {
        let mut h = Harness::new(&["a"]);
        h.connect();
        let actions = h.reply("[MSG:Check door]");
        assert_eq!(
            actions,
            [Action::Notify(TransferEvent::message("[MSG:Check door]"))]
        );
        assert!(h.reply("   ").is_empty());
    }

    // ------------------------------------------------------------------------
    // Homing
    // ------------------------------------------------------------------------

    #[test]
    fn test_homing_suspends_and_resumes_once() {
        let mut h = Harness::new(&["G28", "G1 X1 Y1"]);
        h.connect();

        h.reply("homing_started");
        assert!(matches!(h.session.phase(), Phase::Streaming(Flow::Homing(_))));

        assert!(sends(&h.reply("ok")).is_empty(), "ok ignored while homing");
        assert!(sends(&h.reply("busy")).is_empty());
        assert_eq!(h.session.cursor(), 1);

        let actions = h.reply("homing_complete");
        let (token, delay) = scheduled(&actions).expect("settle scheduled");
        assert_eq!(delay, Duration::from_secs(3));
        assert!(sends(&actions).is_empty());

        assert!(sends(&h.reply("ok")).is_empty(), "ok ignored while settling");

        h.advance(delay);
        assert_eq!(sends(&h.feed(Input::Timer(token))), ["G1 X1 Y1"]);
        assert!(h.feed(Input::Timer(token)).is_empty(), "settle fires once");
        assert_eq!(h.session.cursor(), 2);

        h.reply("ok");
        assert_eq!(h.session.phase(), Phase::Completed);
        assert!(h.messages().contains(&MSG_HOMING_STARTED.to_string()));
        assert!(h.messages().contains(&MSG_HOMING_COMPLETE.to_string()));
    }

    #[test]
    fn test_homing_as_last_line_completes_after_settle() {
        let mut h = Harness::new(&["G28"]);
        h.connect();
        h.reply("homing_started");
        let (token, _) = scheduled(&h.reply("homing_complete")).expect("settle scheduled");

        h.feed(Input::Timer(token));
        assert_eq!(h.session.phase(), Phase::Completed);
    }

    #[test]
    fn test_homing_failed_aborts() {
        let mut h = Harness::new(&["G28", "G1 X1 Y1"]);
        h.connect();
        h.reply("homing_started");
        h.reply("homing_failed");

        assert_eq!(
            h.outcome().map(|o| o.status.clone()),
            Some(TransferStatus::Aborted(AbortReason::HomingFailed))
        );
        assert_eq!(
            h.messages().last().map(String::as_str),
            Some("Homing failed. Please check the machine.")
        );
    }

    #[test]
    fn test_homing_timeout_aborts() {
        let mut h = Harness::new(&["G28", "G1 X1 Y1"]);
        h.connect();
        let (token, delay) = scheduled(&h.reply("homing_started")).expect("homing timeout");
        assert_eq!(delay, Duration::from_secs(35));

        h.feed(Input::Timer(token));
        assert_eq!(
            h.outcome().map(|o| o.status.clone()),
            Some(TransferStatus::Aborted(AbortReason::HomingTimedOut))
        );
    }

    #[test]
    fn test_homing_without_timeout_clears_retry_timer() {
        let mut cfg = config();
        cfg.homing_timeout = None;
        let mut h = Harness::with_config(&["G28"], cfg);
        h.connect();
        let (retry, _) = scheduled(&h.reply("busy")).expect("retry scheduled");

        let actions = h.reply("homing_started");
        assert!(actions.contains(&Action::ClearTimer));
        assert!(h.feed(Input::Timer(retry)).is_empty(), "retry superseded by homing");
    }

    #[test]
    fn test_homing_before_handshake_is_ignored() {
        let mut h = Harness::new(&["a"]);
        h.feed(Input::Opened);
        assert!(h.reply("homing_started").is_empty());
        assert_eq!(h.session.phase(), Phase::AwaitingHandshake);
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    #[test]
    fn test_cancel_right_after_send() {
        let mut h = Harness::new(&["a", "b"]);
        h.connect();
        let sends_before = h.sends().len();

        h.feed(Input::Cancel);
        assert_eq!(h.session.phase(), Phase::Aborted);
        assert_eq!(h.session.cursor(), 0);
        assert_eq!(h.session.retries(), 0);
        assert_eq!(
            h.outcome().map(|o| (o.status.clone(), o.lines_sent)),
            Some((TransferStatus::Cancelled, 1))
        );

        // Late reply, stray timer, tick and second cancel do nothing.
        assert!(h.reply("ok").is_empty());
        assert!(h.feed(Input::Timer(TimerToken::FIRST)).is_empty());
        assert!(h.feed(Input::LivenessTick).is_empty());
        assert!(h.feed(Input::Cancel).is_empty());

        assert_eq!(h.sends().len(), sends_before);
        assert_eq!(h.closes(), 1);
    }

    #[test]
    fn test_cancel_during_backoff_drops_retry() {
        let mut h = Harness::new(&["a"]);
        h.connect();
        let (token, _) = scheduled(&h.reply("busy")).expect("retry scheduled");

        let actions = h.feed(Input::Cancel);
        assert!(actions.contains(&Action::ClearTimer));
        assert!(h.feed(Input::Timer(token)).is_empty());
    }

    #[test]
    fn test_cancel_while_connecting() {
        let mut h = Harness::new(&["a"]);
        h.feed(Input::Cancel);
        assert_eq!(h.closes(), 1);
        assert!(h.feed(Input::Opened).is_empty());
        assert!(h.sends().is_empty());
    }

    // ------------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------------

    #[test]
    fn test_keepalive_after_silence() {
        let mut h = Harness::new(&["G28"]);
        h.connect();
        h.reply("homing_started");

        let mut keepalives = 0;
        for _ in 0..15 {
            h.advance(Duration::from_secs(2));
            keepalives += sends(&h.feed(Input::LivenessTick))
                .iter()
                .filter(|s| *s == KEEPALIVE_LINE)
                .count();
        }
        // 30s of silence with a 12s threshold.
        assert_eq!(keepalives, 2);
    }

    #[test]
    fn test_no_keepalive_before_handshake() {
        let mut h = Harness::new(&["a"]);
        h.feed(Input::Opened);
        h.advance(Duration::from_secs(60));
        assert!(h.feed(Input::LivenessTick).is_empty());
    }

    #[test]
    fn test_ack_postpones_keepalive() {
        let mut h = Harness::new(&["a", "b", "c"]);
        h.connect();
        h.advance(Duration::from_secs(10));
        h.reply("ok");
        h.advance(Duration::from_secs(10));
        assert!(h.feed(Input::LivenessTick).is_empty());
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(1, 8), 13);
        assert_eq!(progress_percent(0, 0), 100);
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    proptest! {
        #[test]
        fn prop_all_ok_run_sends_each_line_once(n in 0usize..40) {
            let lines: Vec<String> = (0..n).map(|i| format!("G1 X{i} Y{i}")).collect();
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            let mut h = Harness::new(&refs);

            h.connect();
            for _ in 0..n {
                let actions = h.reply("ok");
                prop_assert!(sends(&actions).len() <= 1, "never more than one line in flight");
            }

            let sent = h.sends();
            prop_assert_eq!(h.session.phase(), Phase::Completed);
            prop_assert_eq!(&sent[1..], lines.as_slice());
            prop_assert_eq!(h.progress().last().copied(), Some(100));
            prop_assert_eq!(h.closes(), 1);
        }

        #[test]
        fn prop_busy_resend_matches_in_flight_line(n in 1usize..10, busy_at in 0usize..10) {
            let lines: Vec<String> = (0..n).map(|i| format!("L{i}")).collect();
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            let mut h = Harness::new(&refs);
            h.connect();

            let busy_at = busy_at % n;
            for _ in 0..busy_at {
                h.reply("ok");
            }

            let cursor = h.session.cursor();
            let (token, _) = scheduled(&h.reply("busy")).expect("retry scheduled");
            let resent = sends(&h.feed(Input::Timer(token)));

            prop_assert_eq!(h.session.cursor(), cursor);
            prop_assert_eq!(resent, vec![lines[cursor - 1].clone()]);
        }
    }
}
