//! Logging setup using tracing + tracing-subscriber.
//!
//! - Console on stderr, WARN+ unless `--verbose`
//! - Optional daily-rotated file in the configured log directory, at the
//!   configured level
//! - Optional JSON formatting for both
//! - `RUST_LOG` overrides the global filter

use anyhow::{Context, Result};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingSection;

/// Prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "pitch-panel";

/// Keeps the non-blocking file writer alive; logs are flushed on drop.
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber. Hold the returned guards until exit.
pub fn init_logging(
    settings: &LoggingSection,
    log_dir: Option<&Path>,
    verbose: bool,
) -> Result<LogGuards> {
    let file_level = parse_level(&settings.level);
    let console_level = console_level(file_level, verbose);

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            let (layer, guard) = build_file_layer(dir, settings.json, file_level)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_env_filter(file_level.max(console_level))?)
        .with(build_console_layer(settings.json, console_level))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    tracing::debug!(
        file_level = %file_level,
        console_level = %console_level,
        log_dir = ?log_dir,
        "logging initialized"
    );

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn console_level(file_level: Level, verbose: bool) -> Level {
    if verbose {
        file_level.max(Level::DEBUG)
    } else {
        Level::WARN
    }
}

fn build_env_filter(level: Level) -> Result<EnvFilter> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()))
        .add_directive("hyper=warn".parse()?)
        .add_directive("hyper_util=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);
    Ok(filter)
}

fn build_console_layer<S>(json: bool, level: Level) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let filter = LevelFilter::from_level(level);
    if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .with_filter(filter)
            .boxed()
    }
}

fn build_file_layer<S>(
    dir: &Path,
    json: bool,
    level: Level,
) -> Result<(Box<dyn Layer<S> + Send + Sync>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory '{}'", dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .context("Failed to create log file appender")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = LevelFilter::from_level(level);
    let layer = if json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    Ok((layer, guard))
}
