//! Tracing configuration for the command-line filter
//!
//! Diagnostics go to stderr, which the filter also uses for its single error
//! line, so logging stays off unless `RUST_LOG` asks for it.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding the tracing filter
pub const ENV_LOG_FILTER: &str = "RUST_LOG";

/// Environment variable selecting the output format (`compact` or `json`)
pub const ENV_LOG_FORMAT: &str = "BGREMOVE_LOG_FORMAT";

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Compact single-line events
    #[default]
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            #[cfg(feature = "tracing-json")]
            "json" => Ok(Self::Json),
            other => Err(format!("Unknown log format '{}'", other)),
        }
    }
}

/// Tracing configuration builder
#[derive(Debug, Default)]
pub struct TracingConfig {
    /// Output format
    pub format: TracingFormat,
    /// Filter directives; `None` disables logging
    pub env_filter: Option<String>,
}

impl TracingConfig {
    /// Create a configuration with logging disabled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the filter from `RUST_LOG` and the format from `BGREMOVE_LOG_FORMAT`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the filter and format from an arbitrary key lookup
    ///
    /// An unknown format falls back to compact output.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let format = lookup(ENV_LOG_FORMAT)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();

        let config = Self::new().with_format(format);
        match lookup(ENV_LOG_FILTER).filter(|value| !value.trim().is_empty()) {
            Some(filter) => config.with_env_filter(filter),
            None => config,
        }
    }

    /// Set output format
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom filter directives
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directives that will be installed
    #[must_use]
    pub fn filter_directive(&self) -> &str {
        self.env_filter.as_deref().unwrap_or("off")
    }

    /// Install the global subscriber writing to stderr
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        let filter = EnvFilter::try_new(self.filter_directive())?;
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true);

                registry.with(fmt_layer).try_init()?;
            },
        }

        Ok(())
    }
}
