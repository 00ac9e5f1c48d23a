//! Session multiplexing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use wtmux_proto::MAX_CAPSULE_SIZE;

use super::serde_utils::duration_millis;

/// Configuration for the session registry and the sessions it creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// How long a stream that arrives before its session may wait for it
    #[serde(with = "duration_millis")]
    pub stream_reordering_timeout: Duration,

    /// Largest close capsule payload kept from a control stream; longer
    /// close messages are cut, other capsule types are never buffered
    pub max_capsule_size: usize,

    /// Accept queue depth at which a warning is logged
    pub accept_backlog_warning: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            stream_reordering_timeout: Duration::from_secs(5),
            max_capsule_size: MAX_CAPSULE_SIZE,
            accept_backlog_warning: 1024,
        }
    }
}

impl MuxConfig {
    /// Check that the values make sense together
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        if self.stream_reordering_timeout.is_zero() {
            return Err(crate::error::ConfigError::Invalid(
                "stream_reordering_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_capsule_size < 4 {
            return Err(crate::error::ConfigError::Invalid(
                "max_capsule_size must leave room for a close capsule".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MuxConfig::default();
        assert_eq!(config.stream_reordering_timeout, Duration::from_secs(5));
        assert_eq!(config.max_capsule_size, MAX_CAPSULE_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MuxConfig = toml::from_str("stream_reordering_timeout = 250").unwrap();
        assert_eq!(config.stream_reordering_timeout, Duration::from_millis(250));
        assert_eq!(config.accept_backlog_warning, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = MuxConfig {
            stream_reordering_timeout: Duration::ZERO,
            ..MuxConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
