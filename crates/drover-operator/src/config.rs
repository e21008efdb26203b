//! Operator console configuration

use std::time::Duration;

/// Runtime configuration for the operator console.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// WebSocket URL of the hub
    pub hub_url: String,

    /// Shared secret presented in the first frame after connecting
    pub secret: String,

    /// Fixed wait between automatic reconnect attempts
    pub reconnect_delay: Duration,

    /// Automatic reconnects before the console stops and waits for a
    /// manual `reconnect` command
    pub max_reconnect_attempts: u32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:8080".to_string(),
            secret: String::new(),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
        }
    }
}

impl OperatorConfig {
    pub fn with_hub_url(mut self, url: impl Into<String>) -> Self {
        self.hub_url = url.into();
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("operator secret must not be empty".to_string());
        }
        if !self.hub_url.starts_with("ws://") && !self.hub_url.starts_with("wss://") {
            return Err(format!("hub url must be ws:// or wss://, got {}", self.hub_url));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OperatorConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_validation_requires_secret() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_err());

        let config = config.with_secret("swordfish");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_non_websocket_url() {
        let config = OperatorConfig::default()
            .with_secret("swordfish")
            .with_hub_url("http://127.0.0.1:8080");
        assert!(config.validate().is_err());
    }
}
