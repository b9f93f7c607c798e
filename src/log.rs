//! Logging setup for tracewise.
//!
//! Events are written with `tracing` throughout the crate. This module
//! installs the global subscriber:
//! - INFO by default, DEBUG with `--debug` or `TRACEWISE_DEBUG=1`
//! - `RUST_LOG` overrides both when set
//! - output goes to `~/.tracewise/tracewise.log`, truncated on startup,
//!   or to stderr when there is no home directory

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

pub const DEBUG_ENV: &str = "TRACEWISE_DEBUG";
pub const LOG_FILE: &str = "tracewise.log";

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging with explicit debug mode setting.
///
/// The returned guard flushes the log file when dropped; keep it alive for
/// the life of the process.
pub fn init_with_debug(debug: bool) -> Option<WorkerGuard> {
    let debug_enabled = debug || env_debug();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    match log_dir().and_then(|dir| open_log_file(&dir)) {
        Some((path, file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let subscriber = Registry::default().with(filter).with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false),
            );
            if tracing::subscriber::set_global_default(subscriber).is_ok() {
                tracing::debug!(path = %path.display(), "Logging initialized");
            }
            Some(guard)
        }
        None => {
            let subscriber = Registry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
            tracing::subscriber::set_global_default(subscriber).ok();
            None
        }
    }
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tracewise"))
}

/// Create the log directory and truncate the log file.
fn open_log_file(dir: &Path) -> Option<(PathBuf, std::fs::File)> {
    std::fs::create_dir_all(dir).ok()?;
    let path = dir.join(LOG_FILE);
    let file = std::fs::File::create(&path).ok()?;
    Some((path, file))
}
