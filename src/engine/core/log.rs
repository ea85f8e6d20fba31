use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

pub const DEFAULT_LOG_FILE: &str = "ffseg.log";

/// Local wall-clock timestamps, same layout as the debug log
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Install the diagnostic log channel.
///
/// With `path` the subscriber appends to that file; `None` selects stderr,
/// which callers only pass on explicit request. stdout is never used.
/// Calling this twice keeps the first subscriber.
pub fn init_logging(path: Option<&Path>, level: Level) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(LocalTimer)
        .with_ansi(false)
        .with_target(false);

    let installed = match path {
        Some(path) => builder
            .with_writer(Mutex::new(open_append(path)?))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
    Ok(())
}

pub fn default_log_path() -> Result<PathBuf> {
    Ok(std::env::current_dir()?.join(DEFAULT_LOG_FILE))
}

/// Write debug log to ffseg.log in current directory
/// Appends to file, creating it if needed
pub fn write_debug_log(message: &str) -> Result<()> {
    let mut file = open_append(&default_log_path()?)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "[{}] {}", timestamp, message)?;
    Ok(())
}
