//!
//! src/logging.rs
//!
//! Initializes logger: structured events go to a daily rolling file,
//! warnings and above are echoed to stderr for the interactive user
//!

use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_appender::{non_blocking, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::SyncError;

/// Flushes buffered file output when dropped. Hold it for the whole run.
pub struct LoggingGuard(tracing_appender::non_blocking::WorkerGuard);

fn env_filter(cfg: &LoggingConfig) -> Result<EnvFilter, SyncError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::try_new(v),
        _ => EnvFilter::try_new(&cfg.filter_directives)
    };
    filter.map_err(|e| SyncError::Config(format!("invalid log filter: {e}")))
}

fn console_level(cfg: &LoggingConfig) -> Result<LevelFilter, SyncError> {
    LevelFilter::from_str(&cfg.console_level)
        .map_err(|_| SyncError::Config(format!("invalid console level {:?}", cfg.console_level)))
}

pub fn init_logging(cfg: &LoggingConfig) ->
    Result<LoggingGuard, SyncError> {

    std::fs::create_dir_all(&cfg.log_dir)?;
    let appender = rolling::daily(&cfg.log_dir, &cfg.file_prefix);
    let (writer, guard) = non_blocking(appender);

    let time = fmt::time::UtcTime::rfc_3339();
    let file_layer: Box<dyn Layer<Registry> + Send + Sync> = match cfg.format {
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .with_timer(time)
            .with_ansi(false)
            .with_target(cfg.include_target)
            .with_file(cfg.include_file_line)
            .with_line_number(cfg.include_file_line)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter(cfg)?)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_timer(time)
            .with_ansi(false)
            .with_target(cfg.include_target)
            .with_file(cfg.include_file_line)
            .with_line_number(cfg.include_file_line)
            .pretty()
            .with_filter(env_filter(cfg)?)
            .boxed()
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg.with_ansi)
        .with_target(false)
        .without_time()
        .compact()
        .with_filter(console_level(cfg)?);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(ErrorLayer::default())
        .try_init()
        .map_err(|e| SyncError::Config(format!("logger already set: {e}")))?;

    Ok( LoggingGuard(guard) )
}
