//! Logging setup for processes embedding the ticket core

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LoggingSettings, TicketsConfig};
use crate::error::{ConfigError, Error, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The default log level
    pub level: Level,
    /// Whether to emit JSON lines on stdout
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span entry and exit
    pub log_spans: bool,
    /// Per-target overrides of `level`, applied after `RUST_LOG`
    pub directives: Vec<Directive>,
    /// Application name to include in logs
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            directives: Vec::new(),
            app_name: "cas-tickets".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Build from the `logging` section of the configuration file. Invalid
    /// levels and directives are reported here, before anything is installed.
    pub fn from_settings(settings: &LoggingSettings) -> Result<Self> {
        let directives = settings
            .directives
            .iter()
            .map(|directive| parse_directive(directive))
            .collect::<Result<Vec<_>>>()?;

        Ok(LoggingConfig {
            level: parse_log_level(&settings.level)?,
            json: settings.json,
            file_info: settings.file_info,
            log_spans: settings.log_spans,
            directives,
            ..Default::default()
        })
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Add a per-target filter such as `cas_ticket_core::registry=trace`
    pub fn with_directive(mut self, directive: &str) -> Result<Self> {
        self.directives.push(parse_directive(directive)?);
        Ok(self)
    }

    fn env_filter(&self) -> EnvFilter {
        self.directives
            .iter()
            .cloned()
            .fold(EnvFilter::from_default_env().add_directive(self.level.into()), |filter, directive| {
                filter.add_directive(directive)
            })
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let mut subscriber = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_span_events(span_events);

    if config.file_info {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| Error::Logging(e.to_string()))?;

    tracing::info!("Logging initialized for {}", config.app_name);
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| ConfigError::Invalid(format!("Invalid log level: {}", level)).into())
}

fn parse_directive(directive: &str) -> Result<Directive> {
    Directive::from_str(directive.trim())
        .map_err(|e| ConfigError::Invalid(format!("Invalid log directive {}: {}", directive, e)).into())
}

/// Log the version and the registry settings a node starts with
pub fn log_startup(config: &TicketsConfig) {
    tracing::info!(
        "Starting cas-ticket-core v{} (hashed ids: {}, encrypted frames: {}, serializer pool: {})",
        env!("CARGO_PKG_VERSION"),
        config.registry.hash_ticket_ids,
        config.registry.encryption_key.is_some(),
        config.pool.capacity
    );
    if config.cleaner.enabled {
        tracing::info!(
            "Registry cleaner runs after {:?}, then every {:?}",
            config.cleaner.start_delay(),
            config.cleaner.repeat_interval()
        );
    }
}
