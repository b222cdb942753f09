//! Centralized logging setup: console output plus an optional log file

use anyhow::{Context, Result};
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging from the logging configuration
///
/// `RUST_LOG` takes precedence over the configured level. When a file is
/// configured, events are also written there through a non-blocking writer
/// whose guard is forgotten so it lives for the whole program.
///
/// # Errors
/// Returns error if the level is not a valid filter, the log file cannot be
/// set up, or a global subscriber is already installed
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format)];
    if let Some(path) = &config.file {
        layers.push(file_layer(path)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install the global tracing subscriber")
}

/// Parse a configured level or filter directive (`info`, `redis_local_proxy=debug`)
pub fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{level}'"))
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    match format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer(path: &Path) -> Result<BoxedLayer> {
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path '{}' has no file name", path.display()))?;

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Keep guard alive for the program lifetime
    std::mem::forget(guard);

    Ok(tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_accepts_levels_and_directives() {
        assert!(level_filter("info").is_ok());
        assert!(level_filter("warn,redis_local_proxy=debug").is_ok());
    }

    #[test]
    fn test_level_filter_rejects_garbage() {
        assert!(level_filter("redis_local_proxy=loud").is_err());
    }

    #[test]
    fn test_file_layer_needs_file_name() {
        assert!(file_layer(Path::new("/")).is_err());
    }
}
