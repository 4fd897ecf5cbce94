//! Shared utilities for demos.
//!
//! Provides common functionality used across all demos:
//! - Command-line argument parsing
//! - Logging initialization

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Address the fake controller demo listens on.
pub const LOCAL_ENDPOINT: &str = "ws://127.0.0.1:8181";

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments for demos.
///
/// Flags start with `--`; the remaining arguments are positional.
#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
    pub json: bool,
    pub positional: Vec<String>,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            json: args.iter().any(|a| a == "--json"),
            positional: args.into_iter().filter(|a| !a.starts_with("--")).collect(),
        }
    }

    /// Positional argument `index`, or `default`.
    pub fn positional_or(&self, index: usize, default: &str) -> String {
        self.positional
            .get(index)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing/logging.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "sandtable_streamer=debug"
    } else {
        "sandtable_streamer=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
