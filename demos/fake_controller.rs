//! Local stand-in for a sand table controller.
//!
//! Demonstrates the reply vocabulary the streamer understands:
//! - `ok` for the handshake probe and each line
//! - `busy` every 25th line, then `ok` on the resend
//! - `homing_started` / `homing_complete` around `G28`
//! - `error:<n>` for lines that are not G-code
//!
//! Usage:
//!   cargo run --example fake_controller
//!   cargo run --example fake_controller -- 127.0.0.1:9000
//!   cargo run --example fake_controller -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use common::Args;
use sandtable_streamer::{HANDSHAKE_PROBE, KEEPALIVE_LINE};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_ADDR: &str = "127.0.0.1:8181";
const HOMING_TIME: Duration = Duration::from_secs(2);
const BUSY_EVERY: usize = 25;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> std::io::Result<()> {
    println!("=== Fake Controller ===\n");

    let addr = args.positional_or(0, DEFAULT_ADDR);
    let listener = TcpListener::bind(&addr).await?;
    println!("[Setup] Listening on ws://{addr}");
    println!("        Press Ctrl+C to exit...\n");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                println!("[Conn]  {peer} connected");
                tokio::spawn(serve(stream));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

// ============================================================================
// Connection
// ============================================================================

async fn serve(stream: TcpStream) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("[Conn]  upgrade failed: {e}");
            return;
        }
    };

    let mut lines = 0usize;
    let mut pending_busy = false;

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let line = text.as_str();

        let replies: Vec<&str> = if line == HANDSHAKE_PROBE {
            println!("[Recv]  <handshake>");
            vec!["ok"]
        } else if line == KEEPALIVE_LINE {
            println!("[Recv]  <keepalive>");
            Vec::new()
        } else if pending_busy {
            pending_busy = false;
            println!("[Recv]  {line} (resend)");
            vec!["ok"]
        } else {
            lines += 1;
            println!("[Recv]  {lines:>5}: {line}");

            if line.eq_ignore_ascii_case("G28") {
                if ws.send(Message::text("homing_started")).await.is_err() {
                    break;
                }
                tokio::time::sleep(HOMING_TIME).await;
                vec!["homing_complete"]
            } else if !line.starts_with(['G', 'g', 'M', 'm', ';']) {
                vec!["error:20"]
            } else if lines % BUSY_EVERY == 0 {
                pending_busy = true;
                vec!["busy"]
            } else {
                vec!["ok"]
            }
        };

        for reply in replies {
            if ws.send(Message::text(reply)).await.is_err() {
                println!("[Conn]  send failed");
                return;
            }
        }
    }

    println!("[Conn]  closed after {lines} lines");
}
