//! Process-wide tracing setup.

use crate::runtime::LoggingOptions;
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt};
use vmforge_shared::errors::{ForgeError, ForgeResult};

pub const LOG_ENV: &str = "VMFORGE_LOG";
pub const LOG_FILE_PREFIX: &str = "vmforge.log";

/// Holds the file writer guard for the life of the process.
static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

fn env_filter(default_level: &str) -> EnvFilter {
    let directive = [LOG_ENV, "RUST_LOG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_level.to_string());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// With `log_to_file`, output goes to a daily-rolling file in `logs_dir`;
/// otherwise to stderr. Later calls are no-ops, as is losing the race to
/// another subscriber installed by the host process.
pub fn init_logging(options: &LoggingOptions, logs_dir: &Path) -> ForgeResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let builder = fmt()
        .with_env_filter(env_filter(&options.level))
        .with_target(true);

    let mut guard = None;
    let result = if options.log_to_file {
        std::fs::create_dir_all(logs_dir).map_err(|e| {
            ForgeError::Storage(format!(
                "Failed to create log directory {}: {}",
                logs_dir.display(),
                e
            ))
        })?;
        let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        let builder = builder.with_writer(writer).with_ansi(false);
        if options.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        }
    } else {
        let builder = builder.with_writer(std::io::stderr);
        if options.json {
            builder.json().try_init()
        } else {
            builder.compact().try_init()
        }
    };

    if let Err(e) = result {
        // Someone else owns the global subscriber; keep theirs.
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
    let _ = LOG_GUARD.set(guard);

    tracing::debug!(
        level = %options.level,
        json = options.json,
        log_dir = ?options.log_to_file.then_some(logs_dir),
        "Logging initialized"
    );
    Ok(())
}
