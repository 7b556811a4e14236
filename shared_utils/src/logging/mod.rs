//! Logging module for termvpn.
//!
//! Structured logging through the `tracing` crate. Binaries call
//! [`init_logging`] once at start-up and keep the returned guard alive.

use crate::config::Config;
use tracing::Level;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log initialization options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level (default: INFO)
    pub level: Level,

    /// Whether to log to stderr (default: true)
    pub log_to_stderr: bool,

    /// Whether to log to a file (default: false)
    pub log_to_file: bool,

    /// Directory to store log files (default: "/var/log/termvpn")
    pub log_dir: String,

    /// Base filename for log files (default: "termvpn")
    pub log_file_name: String,

    /// Whether to use JSON format for logs (default: false)
    pub json_format: bool,

    /// Whether to include file and line information (default: false)
    pub include_file_line: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            log_to_stderr: true,
            log_to_file: false,
            log_dir: "/var/log/termvpn".to_string(),
            log_file_name: "termvpn".to_string(),
            json_format: false,
            include_file_line: false,
        }
    }
}

impl LogOptions {
    /// Options described by the `log_level` and `[logging]` settings.
    pub fn from_config(config: &Config) -> Self {
        LogOptions {
            level: parse_level(&config.log_level),
            log_to_file: config.logging.log_to_file,
            log_dir: config.logging.log_dir.clone(),
            log_file_name: config.logging.log_file_name.clone(),
            json_format: config.logging.json_format,
            ..Default::default()
        }
    }
}

/// Parse a textual log level, falling back to INFO.
pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with the given options.
///
/// Returns a guard that must be kept alive for the duration of the program
/// to ensure file logs are flushed properly.
///
/// # Examples
///
/// ```
/// use shared_utils::logging::{init_logging, LogOptions};
/// use tracing::Level;
///
/// let options = LogOptions {
///     level: Level::DEBUG,
///     ..Default::default()
/// };
///
/// let _guard = init_logging(options);
/// ```
pub fn init_logging(options: LogOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(options.level.into());

    let mut layers = Vec::new();
    let mut guard = None;

    if options.log_to_stderr {
        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_target(false);

        let stderr_layer = if options.json_format {
            stderr_layer.json().boxed()
        } else {
            stderr_layer.boxed()
        };

        layers.push(stderr_layer);
    }

    if options.log_to_file {
        let file_appender =
            RollingFileAppender::new(Rotation::DAILY, &options.log_dir, &options.log_file_name);

        let (non_blocking, worker_guard) = NonBlocking::new(file_appender);
        guard = Some(worker_guard);

        let file_layer = fmt::layer()
            .with_file(options.include_file_line)
            .with_line_number(options.include_file_line)
            .with_target(true)
            .with_ansi(false)
            .with_writer(non_blocking);

        let file_layer = if options.json_format {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        };

        layers.push(file_layer);
    }

    // Ignore if a subscriber was already set in this process
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init();

    guard
}
