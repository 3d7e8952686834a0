//! Tracing setup for the binary.
//!
//! Filter comes from `RUST_LOG` (default `info`, or `debug` for this crate and the library
//! with `-v`). With `LOG_FILE` set, logs are appended there without ANSI colors; otherwise
//! `-v` sends them to stderr and a plain run drops them so stdout carries only run output.

use std::error::Error;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "info,deepresearch=debug,cli=debug"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber. Keep the returned guard alive until exit so buffered
/// file logs are flushed.
pub fn init(verbose: bool) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    if let Some(path) = std::env::var_os("LOG_FILE").map(PathBuf::from) {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = path.file_name().ok_or("LOG_FILE has no file name")?;
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file));
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(filter(verbose)),
            )
            .try_init()?;
        return Ok(Some(guard));
    }
    if verbose {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_filter(filter(verbose)),
            )
            .try_init()?;
    }
    Ok(None)
}
