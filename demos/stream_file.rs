//! Stream a G-code file to a controller.
//!
//! Demonstrates:
//! - Building a streamer for an endpoint
//! - Following progress through a channel observer
//! - Cancelling with Ctrl+C
//!
//! Usage:
//!   cargo run --example stream_file -- pattern.gcode
//!   cargo run --example stream_file -- pattern.gcode ws://10.0.0.42:81
//!   cargo run --example stream_file -- pattern.gcode --json
//!   cargo run --example stream_file -- pattern.gcode --debug
//!
//! Without an endpoint the local fake controller is used
//! (`cargo run --example fake_controller`).

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use common::{Args, LOCAL_ENDPOINT};
use sandtable_streamer::{ChannelObserver, Program, Result, Streamer, TransferEvent};

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

async fn run(args: Args) -> Result<()> {
    println!("=== Stream File ===\n");

    let Some(path) = args.positional.first() else {
        eprintln!("Usage: stream_file <file.gcode> [ws://host:port] [--json] [--debug]");
        return Ok(());
    };
    let endpoint = args.positional_or(1, LOCAL_ENDPOINT);

    // ========================================================================
    // Load Program
    // ========================================================================

    let program = Program::from_path(path)?;
    println!("[Setup] Loaded {} lines from {path}", program.len());

    // ========================================================================
    // Start Transfer
    // ========================================================================

    let streamer = Streamer::builder().endpoint(&endpoint).build()?;
    let (observer, mut events) = ChannelObserver::new();
    let handle = streamer.spawn(Arc::new(observer));

    println!("[Setup] Streaming to {endpoint}\n");
    let transfer = handle.start(program)?;

    let json = args.json;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
                continue;
            }

            match event {
                TransferEvent::LineInfo { current, total } => {
                    println!("        line {current}/{total}");
                }
                TransferEvent::Message { text } => println!("[Info]  {text}"),
                TransferEvent::SendingChanged { sending } => {
                    println!("[State] sending = {sending}");
                }
                TransferEvent::Progress { .. } => {}
            }
        }
    });

    // ========================================================================
    // Wait
    // ========================================================================

    let outcome = tokio::select! {
        outcome = transfer.outcome() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            println!("\n[Ctrl+C] Cancelling...");
            handle.cancel()?;
            handle.shutdown().await;
            printer.await.ok();
            return Ok(());
        }
    };

    handle.shutdown().await;
    printer.await.ok();

    println!(
        "\n=== Done: {:?} ({}/{} lines) ===",
        outcome.status, outcome.lines_sent, outcome.total
    );
    Ok(())
}
