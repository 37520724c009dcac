//! Tracing configuration for structured logging
//!
//! Library code only emits events; the binary installs the subscriber.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default)
    Console,
    /// Plain output without ANSI colors, for log files captured by the desktop shell
    Compact,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Create a new tracing configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set output format
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Initialize the global subscriber
    ///
    /// An explicit filter wins, then `RUST_LOG`, then the verbosity level.
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(self.verbosity_to_filter()))?,
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_level(true)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },
        }

        Ok(())
    }
}

/// Initialize tracing with CLI defaults
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8, plain: bool) -> anyhow::Result<()> {
    let format = if plain {
        TracingFormat::Compact
    } else {
        TracingFormat::Console
    };
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .init()
}

/// Span helpers for common operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one HTTP request's pipeline work
    pub fn request(endpoint: &str, request_id: &uuid::Uuid) -> Span {
        tracing::span!(
            Level::INFO,
            "request",
            endpoint = %endpoint,
            request_id = %request_id
        )
    }

    /// Span covering acquisition and loading of one capability
    pub fn bootstrap(capability: &str) -> Span {
        tracing::span!(Level::INFO, "bootstrap", capability = %capability)
    }
}
