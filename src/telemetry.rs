//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events. Binaries and tests that
//! want to see them call [`init_tracing`] or [`init_subscriber`] once; later
//! calls are no-ops.
//!
//! ```rust,ignore
//! bhumi::telemetry::init_tracing("bhumi=debug")?;
//! ```

use tracing_subscriber::EnvFilter;

use crate::error::LlmError;

/// Line format for emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Compact,
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
    /// Include the event target (module path).
    pub with_target: bool,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            with_target: true,
        }
    }
}

impl SubscriberConfig {
    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }

    pub const fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// `bhumi=<level>` directive for this configuration.
    pub fn filter(&self) -> String {
        format!("bhumi={}", self.log_level.as_str().to_ascii_lowercase())
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`, or by `default_filter`
/// when the variable is unset. Returns `false` when a global subscriber was
/// already installed.
pub fn init_tracing(default_filter: &str) -> Result<bool, LlmError> {
    let filter = env_filter(default_filter)?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok())
}

/// Install a subscriber from a [`SubscriberConfig`]. `RUST_LOG` still wins.
pub fn init_subscriber(config: &SubscriberConfig) -> Result<bool, LlmError> {
    let filter = env_filter(&config.filter())?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);
    let installed = match config.output_format {
        OutputFormat::Text => builder.try_init(),
        OutputFormat::Compact => builder.compact().try_init(),
    };
    Ok(installed.is_ok())
}

fn env_filter(default_filter: &str) -> Result<EnvFilter, LlmError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| {
            LlmError::ConfigurationError(format!("invalid tracing filter '{default_filter}': {e}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_becomes_crate_directive() {
        assert_eq!(SubscriberConfig::default().filter(), "bhumi=info");
        assert_eq!(SubscriberConfig::debug().filter(), "bhumi=debug");
    }

    #[test]
    fn second_init_is_a_no_op() {
        let _ = init_tracing("bhumi=warn");
        assert!(!init_subscriber(&SubscriberConfig::default()).unwrap());
    }
}
