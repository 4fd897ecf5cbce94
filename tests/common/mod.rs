//! Shared helpers for integration tests.
//!
//! [`FakeController`] is a local WebSocket server that answers every
//! inbound line through a script, the way the controller firmware does.

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use sandtable_streamer::{
    HANDSHAKE_PROBE, KEEPALIVE_LINE, RetryPolicy, Streamer, StreamerBuilder, TransferEvent,
};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Script Types
// ============================================================================

/// What the fake controller does in answer to a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Respond {
    /// Send a text frame.
    Text(String),
    /// Drop the connection.
    HangUp,
}

impl Respond {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Single reply helper.
pub fn reply(text: &str) -> Vec<Respond> {
    vec![Respond::text(text)]
}

/// What the fake controller observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Connected,
    Line(String),
    Closed,
}

/// Acks the handshake and every line; ignores keepalives.
pub fn grbl(line: &str) -> Vec<Respond> {
    if line == KEEPALIVE_LINE {
        Vec::new()
    } else {
        reply("ok")
    }
}

/// Acks only the handshake.
pub fn handshake_only(line: &str) -> Vec<Respond> {
    if line == HANDSHAKE_PROBE {
        reply("ok")
    } else {
        Vec::new()
    }
}

// ============================================================================
// FakeController
// ============================================================================

pub struct FakeController {
    port: u16,
    received: mpsc::UnboundedReceiver<Received>,
    task: JoinHandle<()>,
}

impl FakeController {
    /// Binds a local port and serves every client with `script`.
    pub async fn spawn<F>(script: F) -> anyhow::Result<Self>
    where
        F: FnMut(&str) -> Vec<Respond> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (tx, received) = mpsc::unbounded_channel();
        let script = Arc::new(Mutex::new(script));

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&script), tx.clone()));
            }
        });

        Ok(Self {
            port,
            received,
            task,
        })
    }

    /// `ws://` URL of this controller.
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Next observation, or `None` after [`WAIT`].
    pub async fn next(&mut self) -> Option<Received> {
        timeout(WAIT, self.received.recv()).await.ok().flatten()
    }

    /// Next line received, skipping connects.
    pub async fn next_line(&mut self) -> anyhow::Result<String> {
        loop {
            match self.next().await.context("controller saw nothing")? {
                Received::Line(line) => return Ok(line),
                Received::Connected => continue,
                Received::Closed => bail!("connection closed while waiting for a line"),
            }
        }
    }

    /// Every line received until the client disconnects.
    pub async fn lines_until_closed(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            match self.next().await.context("controller never saw a close")? {
                Received::Line(line) => lines.push(line),
                Received::Connected => {}
                Received::Closed => return Ok(lines),
            }
        }
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<F>(stream: TcpStream, script: Arc<Mutex<F>>, tx: mpsc::UnboundedSender<Received>)
where
    F: FnMut(&str) -> Vec<Respond> + Send + 'static,
{
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let _ = tx.send(Received::Connected);

    'conn: while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Close(_) => break,
            _ => continue,
        };

        let responses = {
            let mut script = script.lock();
            (*script)(&text)
        };
        let _ = tx.send(Received::Line(text));

        for response in responses {
            match response {
                Respond::Text(reply) => {
                    if ws.send(Message::Text(reply.into())).await.is_err() {
                        break 'conn;
                    }
                }
                Respond::HangUp => {
                    let _ = ws.close(None).await;
                    break 'conn;
                }
            }
        }
    }

    let _ = tx.send(Received::Closed);
}

// ============================================================================
// Streamer Helpers
// ============================================================================

/// Builder with timings scaled down for tests.
pub fn fast_builder(url: &str) -> StreamerBuilder {
    Streamer::builder()
        .endpoint(url)
        .connect_timeout(Duration::from_secs(2))
        .keepalive_period(Duration::from_secs(1))
        .keepalive_threshold(Duration::from_secs(10))
        .settle_delay(Duration::from_millis(50))
        .homing_timeout(Some(Duration::from_secs(2)))
        .retry_policy(RetryPolicy {
            base: Duration::from_millis(10),
            max: Duration::from_millis(40),
            max_retries: 5,
        })
}

/// Drains every event already delivered.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Message texts among `events`.
pub fn messages(events: &[TransferEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::Message { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
