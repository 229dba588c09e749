//! Process-wide event sink: a console layer and an append-only run log file.
//!
//! Levels map as `OK` → `INFO` with `status = "ok"`, `WARNING` → `WARN`, and
//! `FATAL` → `ERROR` with `fatal = true`.

use crate::backup::backup_config::RunConfiguration;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Console-only subscriber, used as a scoped default until the run log is known.
pub fn console_subscriber(color: bool) -> impl Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .with_target(false)
        .with_max_level(LevelFilter::INFO)
        .finish()
}

/// Installs the global console + file subscriber for the run.
pub fn init(config: &RunConfiguration) -> Result<()> {
    if let Some(parent) = config.log_file().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_file())
        .map_err(Error::from)
        .add_msg(format!("Cannot open run log {:?}", config.log_file()))?;

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(*config.color())
        .with_target(false);
    let log_file = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(LevelFilter::INFO)
        .with(console)
        .with(log_file)
        .try_init()?;
    Ok(())
}

/// Moves the run log into `dest_dir`, keeping its file name.
///
/// Returns `None` when there is no log to move. Falls back to copy + remove
/// when a rename crosses filesystems.
pub fn relocate_log(log_file: &Path, dest_dir: &Path) -> Result<Option<PathBuf>> {
    if !log_file.is_file() {
        return Ok(None);
    }
    let file_name = log_file
        .file_name()
        .ok_or_else(|| std::io::Error::other("run log path has no file name"))?;
    let dest = dest_dir.join(file_name);
    if std::fs::rename(log_file, &dest).is_err() {
        std::fs::copy(log_file, &dest)
            .map_err(Error::from)
            .add_msg(format!("Cannot copy run log to {:?}", dest))?;
        std::fs::remove_file(log_file)?;
    }
    Ok(Some(dest))
}
