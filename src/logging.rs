//! Tracing subscriber setup for the `ftpsync` binary.
//!
//! Console output goes to stderr. A log file is added when `--log-file` is
//! given, or at `~/.ftpsync/logs/ftpsync.log` when running with `-vv`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILE: &str = "ftpsync.log";

/// Level name for a `-v` count: 0=info, 1=debug, 2+=trace.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// `~/.ftpsync/logs/ftpsync.log`, if a home directory is known.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ftpsync").join("logs").join(DEFAULT_LOG_FILE))
}

/// Where file logs go for this invocation, if anywhere.
pub fn resolve_log_file(verbosity: u8, log_file: Option<&Path>) -> Option<PathBuf> {
    match log_file {
        Some(p) => Some(p.to_path_buf()),
        None if verbosity >= 2 => default_log_path(),
        None => None,
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flag.
/// Keep the returned guard alive until exit so buffered file lines are flushed.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ftpsync={},suppaftp=warn", level)));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 1)
        .with_file(verbosity >= 2)
        .with_line_number(verbosity >= 2);

    let (file_layer, guard) = match resolve_log_file(verbosity, log_file) {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or(DEFAULT_LOG_FILE.into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot install log subscriber: {}", e))?;
    Ok(guard)
}
