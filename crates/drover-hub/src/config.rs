//! Hub configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the relay hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the combined HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,

    /// Shared secret operators must present in their first frame
    pub operator_secret: String,

    /// How long a fresh connection may stay silent before it is dropped
    pub negotiation_timeout: Duration,

    /// Liveness probe interval
    pub ping_interval: Duration,

    /// Delay before the single bind retry
    pub bind_retry_delay: Duration,

    /// Directory agent wallpapers are persisted under
    pub media_dir: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static address"),
            operator_secret: String::new(),
            negotiation_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            bind_retry_delay: Duration::from_secs(1),
            media_dir: PathBuf::from("./wallpapers"),
        }
    }
}

impl HubConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_operator_secret(mut self, secret: impl Into<String>) -> Self {
        self.operator_secret = secret.into();
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn with_media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.media_dir = dir.into();
        self
    }

    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.operator_secret.is_empty() {
            return Err("operator secret must not be empty".to_string());
        }
        if self.ping_interval < Duration::from_secs(1) {
            return Err("ping interval below 1s would flood peers".to_string());
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.bind_addr.port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.negotiation_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_requires_secret() {
        let config = HubConfig::default();
        assert!(config.validate().is_err());

        let config = config.with_operator_secret("swordfish");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_subsecond_ping() {
        let config = HubConfig::default()
            .with_operator_secret("swordfish")
            .with_ping_interval(Duration::from_millis(100));
        assert!(config.validate().is_err());
    }
}
