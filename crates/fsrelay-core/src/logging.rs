//! Process-wide `tracing` subscriber setup.
//!
//! `RUST_LOG`, when set, replaces the filter built from the configuration.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use fsrelay_config::LoggingConfig;

/// Errors from installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter {directive:?}: {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Filter directive for a config level and a `-v` count.
///
/// Each `-v` raises the level by one step past the configured one
/// (`debug`, then `trace`). `debug = true` turns on per-connection events
/// from this crate without raising every other target.
pub fn filter_directive(config: &LoggingConfig, verbosity: u8) -> String {
    let level = match verbosity {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    if config.debug && verbosity == 0 {
        format!("{level},fsrelay_core=debug")
    } else {
        level.to_string()
    }
}

/// Open `path` for appending, creating it if needed.
pub fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::OpenFile {
            path: path.display().to_string(),
            source,
        })
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<(), LoggingError> {
    let directive = filter_directive(config, verbosity);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directive).map_err(|source| LoggingError::Filter {
            directive: directive.clone(),
            source,
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match &config.file {
        Some(path) => {
            let file = open_log_file(Path::new(path))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInstalled)
}
