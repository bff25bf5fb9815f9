//! Structured logging for overseer.
//!
//! Log levels follow `tracing`:
//! - ERROR: Critical failures that prevent operations from completing
//! - WARN: Unexpected conditions that are recoverable (failed checkpoints, sink errors)
//! - INFO: High-level lifecycle events (workflow created, gates passed, tasks finished)
//! - DEBUG: Detailed traces of scheduling decisions
//! - TRACE: Very detailed traces (event payloads)
//!
//! Debug mode can be enabled with `--debug` flag or `OVERSEER_DEBUG=1` env var.
//! `OVERSEER_LOG` takes a full `EnvFilter` directive and wins over both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Environment variable that enables debug logging.
pub const DEBUG_ENV: &str = "OVERSEER_DEBUG";

/// Environment variable holding an explicit filter directive.
pub const FILTER_ENV: &str = "OVERSEER_LOG";

/// Initialize logging to ~/.overseer/overseer.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_debug(debug: bool) {
    let filter = EnvFilter::try_from_env(FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug || env_debug())));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    match log_file() {
        Some(file) => {
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}

/// Whether `OVERSEER_DEBUG` asks for debug output.
pub fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "overseer=debug"
    } else {
        "overseer=info"
    }
}

/// Path of the log file, if a home directory exists.
pub fn log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".overseer").join("overseer.log"))
}

fn log_file() -> Option<File> {
    let path = log_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    // Truncate file on startup
    File::create(&path).ok()
}
