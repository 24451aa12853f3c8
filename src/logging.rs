//! Structured logging setup.
//!
//! `RUST_LOG` wins over the configured level when set. Output goes to stdout
//! or, when `log.dir` is configured, to a daily-rolling file. With
//! `log.non_blocking` the writes happen on a background thread; keep the
//! returned guard alive until exit or buffered lines are lost.

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogConfig, LogFormat};

/// Unknown names fall back to `INFO`.
#[must_use]
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter for `level`, with the HTTP server's per-connection chatter capped
/// at warn.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let level = parse_level(level);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let directive = "may_minihttp::http_server=warn"
        .parse()
        .context("invalid may_minihttp filter directive")?;
    Ok(filter.add_directive(directive))
}

fn make_writer(config: &LogConfig) -> Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    match (&config.dir, config.non_blocking) {
        (Some(dir), non_blocking) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            if non_blocking {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                Ok((BoxMakeWriter::new(writer), Some(guard)))
            } else {
                Ok((BoxMakeWriter::new(appender), None))
            }
        }
        (None, true) => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            Ok((BoxMakeWriter::new(writer), Some(guard)))
        }
        (None, false) => Ok((BoxMakeWriter::new(std::io::stdout), None)),
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails when the log directory cannot be created or a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level)?;
    let (writer, guard) = make_writer(config)?;

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_list(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
