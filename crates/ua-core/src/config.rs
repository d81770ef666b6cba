//! User agent configuration
//!
//! All timers are expressed in milliseconds except the registration lifetime, which
//! travels on the wire in seconds. Defaults follow RFC 3261 timer values with
//! T1 = 500ms: REGISTER, CANCEL and BYE give up after 64×T1, and an unanswered
//! INVITE fails when Timer B (also 64×T1) fires.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_ua_core::config::UserAgentConfig;
//!
//! let config = UserAgentConfig::new()
//!     .with_invite_timeout_ms(5_000)
//!     .with_ringing_timeout_ms(None);
//!
//! assert_eq!(config.invite_timeout_ms, 5_000);
//! assert!(config.ringing_timeout_ms.is_none());
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{UaError, UaResult};
use crate::logging::LoggingConfig;
use crate::transport::StatusCode;

/// Default registration lifetime in seconds
pub const DEFAULT_REGISTER_EXPIRES_SECS: u32 = 3600;
/// Default timeout for REGISTER, CANCEL and BYE exchanges (64×T1)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 32_000;
/// Default INVITE timeout (Timer B)
pub const DEFAULT_INVITE_TIMEOUT_MS: u64 = 32_000;
/// Default time an inbound invite may ring before it is turned away
pub const DEFAULT_RINGING_TIMEOUT_MS: u64 = 180_000;

/// Configuration for a [`UserAgent`](crate::UserAgent)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Product string sent with every request
    pub user_agent: String,
    /// Registration lifetime requested with every REGISTER
    pub register_expires_secs: u32,
    /// Timeout for REGISTER, CANCEL and BYE
    pub request_timeout_ms: u64,
    /// Timeout for an INVITE to receive a final response
    pub invite_timeout_ms: u64,
    /// How long an inbound invite may ring unanswered; `None` rings forever
    pub ringing_timeout_ms: Option<u64>,
    /// Capacity of the broadcast event channel
    pub event_channel_capacity: usize,
    /// Status sent by `reject()`
    pub reject_status: u16,
    /// Subscriber installed by [`setup_logging`](crate::logging::setup_logging)
    pub logging: LoggingConfig,
}

impl UserAgentConfig {
    /// Create a configuration with default values
    ///
    /// ```rust
    /// use rvoip_ua_core::config::UserAgentConfig;
    ///
    /// let config = UserAgentConfig::new();
    /// assert_eq!(config.register_expires_secs, 3600);
    /// assert_eq!(config.request_timeout_ms, 32_000);
    /// assert_eq!(config.reject_status, 486);
    /// ```
    pub fn new() -> Self {
        Self {
            user_agent: format!("rvoip-ua-core/{}", env!("CARGO_PKG_VERSION")),
            register_expires_secs: DEFAULT_REGISTER_EXPIRES_SECS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            invite_timeout_ms: DEFAULT_INVITE_TIMEOUT_MS,
            ringing_timeout_ms: Some(DEFAULT_RINGING_TIMEOUT_MS),
            event_channel_capacity: 256,
            reject_status: StatusCode::BUSY_HERE.as_u16(),
            logging: LoggingConfig::default(),
        }
    }

    /// Parse a configuration from TOML; missing keys take their defaults
    ///
    /// ```rust
    /// use rvoip_ua_core::config::UserAgentConfig;
    ///
    /// let config = UserAgentConfig::from_toml_str("invite_timeout_ms = 1000").unwrap();
    /// assert_eq!(config.invite_timeout_ms, 1000);
    /// assert_eq!(config.register_expires_secs, 3600);
    /// ```
    pub fn from_toml_str(input: &str) -> UaResult<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| UaError::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_register_expires_secs(mut self, secs: u32) -> Self {
        self.register_expires_secs = secs;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_invite_timeout_ms(mut self, ms: u64) -> Self {
        self.invite_timeout_ms = ms;
        self
    }

    pub fn with_ringing_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.ringing_timeout_ms = ms;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_reject_status(mut self, status: u16) -> Self {
        self.reject_status = status;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Check the configuration for values the user agent cannot run with
    pub fn validate(&self) -> UaResult<()> {
        if self.register_expires_secs == 0 {
            return Err(UaError::config("register_expires_secs must be non-zero"));
        }
        if self.request_timeout_ms == 0 {
            return Err(UaError::config("request_timeout_ms must be non-zero"));
        }
        if self.invite_timeout_ms == 0 {
            return Err(UaError::config("invite_timeout_ms must be non-zero"));
        }
        if self.ringing_timeout_ms == Some(0) {
            return Err(UaError::config("ringing_timeout_ms must be non-zero when set"));
        }
        if self.event_channel_capacity == 0 {
            return Err(UaError::config("event_channel_capacity must be non-zero"));
        }
        if !(300..=699).contains(&self.reject_status) {
            return Err(UaError::config(format!(
                "reject_status {} is not a final failure status",
                self.reject_status
            )));
        }
        self.logging.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn invite_timeout(&self) -> Duration {
        Duration::from_millis(self.invite_timeout_ms)
    }

    pub fn ringing_timeout(&self) -> Option<Duration> {
        self.ringing_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = UserAgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.invite_timeout(), Duration::from_secs(32));
        assert_eq!(config.ringing_timeout(), Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(UserAgentConfig::new().with_request_timeout_ms(0).validate().is_err());
        assert!(UserAgentConfig::new().with_ringing_timeout_ms(Some(0)).validate().is_err());
        assert!(UserAgentConfig::new().with_event_channel_capacity(0).validate().is_err());
        assert!(UserAgentConfig::new().with_reject_status(200).validate().is_err());
        assert!(UserAgentConfig::new().with_reject_status(603).validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = UserAgentConfig::from_toml_str(
            r#"
            user_agent = "softphone/2.0"
            register_expires_secs = 600
            reject_status = 603

            [logging]
            filter = "rvoip_ua_core=debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.filter, "rvoip_ua_core=debug");
        assert_eq!(config.logging.format, crate::logging::LogFormat::Json);
        assert_eq!(config.user_agent, "softphone/2.0");
        assert_eq!(config.register_expires_secs, 600);
        assert_eq!(config.reject_status, 603);
        assert_eq!(config.invite_timeout_ms, DEFAULT_INVITE_TIMEOUT_MS);

        let err = UserAgentConfig::from_toml_str("request_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, UaError::Configuration { .. }));

        let err = UserAgentConfig::from_toml_str("[logging]\nfilter = \"rvoip_ua_core=loudest\"").unwrap_err();
        assert!(matches!(err, UaError::Configuration { .. }));

        assert!(UserAgentConfig::from_toml_str("request_timeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_serde_json_round_trip() {
        let config = UserAgentConfig::new().with_ringing_timeout_ms(None);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: UserAgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
