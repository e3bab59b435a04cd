//! Log setup shared by the binaries: human readable lines on stdout and, when a
//! directory is given, a plain-text copy in `<dir>/BiSeNet-<unix time>.log`.

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the file writer flushing; drop it at the end of `main`.
#[must_use]
pub struct LoggerGuard {
    _file: Option<WorkerGuard>,
    pub log_file: Option<PathBuf>,
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info` level.
pub fn setup_logger(log_dir: Option<&Path>) -> Result<LoggerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).with_filter(filter());

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(stdout)
            .try_init()
            .context("Failed to install logger")?;
        return Ok(LoggerGuard {
            _file: None,
            log_file: None,
        });
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let file_name = format!("BiSeNet-{stamp}.log");

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        dir, &file_name,
    ));
    let file = fmt::layer()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .context("Failed to install logger")?;

    Ok(LoggerGuard {
        _file: Some(guard),
        log_file: Some(dir.join(file_name)),
    })
}
