//! Logging setup for applications embedding the user agent
//!
//! The crate itself only emits `tracing` events under the `rvoip_ua_core` target;
//! installing a subscriber is left to the application. The `[logging]` table of a
//! [`UserAgentConfig`](crate::UserAgentConfig) describes one, and [`setup_logging`]
//! installs it.
//!
//! ```toml
//! [logging]
//! filter = "rvoip_ua_core=debug"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{UaError, UaResult};

/// Default directives: signaling milestones only
pub const DEFAULT_LOG_FILTER: &str = "rvoip_ua_core=info";

/// Line format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` overrides them when set
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn validate(&self) -> UaResult<()> {
        self.env_filter().map(|_| ())
    }

    fn env_filter(&self) -> UaResult<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .map_err(|e| UaError::config(format!("invalid log filter {:?}: {}", self.filter, e)))
    }
}

/// Install a global `tracing` subscriber
///
/// Fails with [`UaError::Configuration`] if the filter does not parse or a global
/// subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> UaResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.env_filter()?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| UaError::config(format!("logging already initialised: {}", e)))?;

    tracing::debug!(filter = %config.filter, format = ?config.format, "logging initialised");
    Ok(())
}
