//! Shared logging configuration and initialization.

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{non_empty_var, override_parsed, parse_bool};
use crate::ingest::LoadedDataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `MALGRID_LOG_*`. Blank or unparsable values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();
    if let Some(level) = non_empty_var("MALGRID_LOG_LEVEL") {
        config.level = level;
    }
    override_parsed("MALGRID_LOG_FORMAT", &mut config.format, parse_log_format);
    override_parsed("MALGRID_LOG_TARGET", &mut config.include_target, parse_bool);
    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "grid_server",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "grid_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/api"
    );
}

/// Records which data source backs the server, or why none does.
pub fn log_source_selected(source: Option<&Path>, note: &str) {
    match source {
        Some(path) => info!(
            component = "grid_server",
            event = "source.selected",
            source = %path.display(),
            note
        ),
        None => info!(
            component = "grid_server",
            event = "source.selected",
            source = "none",
            note
        ),
    }
}

pub fn log_dataset_ready(loaded: &LoadedDataset, cell_count: usize) {
    info!(
        component = "grid_server",
        event = "dataset.ready",
        schema = loaded.schema.map(|schema| schema.as_str()).unwrap_or("none"),
        dates = loaded.dataset.dates().len(),
        cells = cell_count,
        cells_with_data = loaded.dataset.cells_with_data(),
        rows_dropped = loaded.report.as_ref().map_or(0, |report| report.rows_dropped())
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}
