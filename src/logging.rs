// Logging setup for the CodeTutor engine
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{CliError, CodeTutorError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format (pretty for terminals, json for programmatic use)
    pub format: LogFormat,
    /// Color output configuration
    pub color: ColorConfig,
    /// Whether to show targets (module names)
    pub show_targets: bool,
}

/// Log output format options
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    /// Unrecognised names fall back to `Pretty`
    pub fn parse(name: Option<&str>) -> Self {
        match name.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => LogFormat::Json,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Color output configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ColorConfig {
    Auto,
    Always,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Pretty,
            color: ColorConfig::Auto,
            show_targets: false,
        }
    }
}

impl LogConfig {
    /// Create logging configuration from CLI arguments
    pub fn from_cli(verbose: bool, quiet: bool, color: Option<String>) -> Self {
        // Program output goes to stdout, so the default stays quiet on stderr
        let level = if quiet {
            Level::ERROR
        } else if verbose {
            Level::DEBUG
        } else {
            Level::WARN
        };

        let color_config = match color.as_deref() {
            Some("always") => ColorConfig::Always,
            Some("never") => ColorConfig::Never,
            _ => ColorConfig::Auto,
        };

        Self {
            level,
            format: LogFormat::Pretty,
            color: color_config,
            show_targets: false,
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Check if colors should be used based on configuration and terminal
    pub fn should_use_colors(&self) -> bool {
        match self.color {
            ColorConfig::Always => true,
            ColorConfig::Never => false,
            ColorConfig::Auto => {
                io::stderr().is_terminal()
                    && std::env::var("TERM").map_or(true, |term| term != "dumb")
                    && std::env::var("NO_COLOR").is_err()
            }
        }
    }
}

/// Initialize the logging system with the given configuration.
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("codetutor={}", config.level)));

    let ansi = config.should_use_colors();
    let result = match config.format {
        LogFormat::Pretty => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_ansi(ansi)
            .with_target(config.show_targets)
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .json()
            .try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_ansi(ansi)
            .compact()
            .with_target(config.show_targets)
            .try_init(),
    };

    result.map_err(|e| {
        CodeTutorError::Cli(Box::new(CliError::RuntimeError {
            message: format!("Failed to initialize logging: {e}"),
        }))
    })
}

/// Span helpers shared by the engine components
pub mod utils {
    use std::time::Duration;
    use tracing::{span, Level, Span};

    /// Span covering one execution request
    pub fn execution_span(request_id: &str, language: &str, timeout: Duration) -> Span {
        span!(
            Level::INFO,
            "execution",
            request_id = %request_id,
            language = %language,
            timeout_ms = timeout.as_millis() as u64
        )
    }

    /// Span covering a toolchain detection
    pub fn detection_span(language: &str) -> Span {
        span!(Level::DEBUG, "runtime_detection", language = %language)
    }

    /// Span covering a validation run
    pub fn validation_span(language: &str, test_count: usize) -> Span {
        span!(
            Level::INFO,
            "validation",
            language = %language,
            test_count = test_count
        )
    }
}
