//! Plain configuration structs.
//!
//! Both can be built in code or deserialized from whatever format the host uses; durations are
//! written in humantime form (`"2m"`, `"500ms"`).
use std::time::Duration;

use serde::Deserialize;

use crate::error::{JsonRpcError, Result};

pub const DEFAULT_CLIENT_NAME: &str = "<client-anonymous>";
pub const DEFAULT_SERVER_NAME: &str = "<server-anonymous>";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest accepted abandonment timeout
pub const MIN_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Diagnostic label used in logs
    pub name: String,

    /// How long a request may stay pending before it is rejected with a timeout error
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// How often pending requests are checked against `timeout`
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLIENT_NAME.to_string(),
            timeout: DEFAULT_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout < MIN_TIMEOUT {
            return Err(JsonRpcError::InvalidConfig {
                message: format!(
                    "timeout must be at least {}, got {}",
                    humantime::format_duration(MIN_TIMEOUT),
                    humantime::format_duration(self.timeout)
                ),
            });
        }

        if self.sweep_interval.is_zero() {
            return Err(JsonRpcError::InvalidConfig {
                message: "sweep_interval must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Diagnostic label used in logs
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.name, "<client-anonymous>");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        config.validate().unwrap();

        assert_eq!(ServerConfig::default().name, "<server-anonymous>");
    }

    #[test]
    fn load_from_yaml() {
        let config: ClientConfig = serde_yaml::from_str(
            r#"
name: billing
timeout: 2m 30s
sweep_interval: 250ms
"#,
        )
        .unwrap();

        assert_eq!(
            config,
            ClientConfig {
                name: "billing".to_string(),
                timeout: Duration::from_secs(150),
                sweep_interval: Duration::from_millis(250),
            }
        );

        // Missing fields fall back to defaults
        let config: ClientConfig = serde_yaml::from_str("timeout: 10s").unwrap();
        assert_eq!(config.name, DEFAULT_CLIENT_NAME);
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);

        let config: ServerConfig = serde_json::from_str(r#"{"name": "api"}"#).unwrap();
        assert_eq!(config.name, "api");
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_yaml::from_str::<ClientConfig>("timeout_ms: 100").is_err());
    }

    #[test]
    fn validation() {
        let too_short = ClientConfig {
            timeout: Duration::from_millis(9),
            ..Default::default()
        };
        assert_matches!(
            too_short.validate(),
            Err(JsonRpcError::InvalidConfig { message }) if message == "timeout must be at least 10ms, got 9ms"
        );

        let minimum = ClientConfig {
            timeout: Duration::from_millis(10),
            ..Default::default()
        };
        minimum.validate().unwrap();

        let no_sweep = ClientConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(no_sweep.validate(), Err(JsonRpcError::InvalidConfig { .. }));
    }
}
