use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::protocol::MetricKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address every local socket binds to
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,

    /// Relay listener port, 0 lets the OS pick one
    #[serde(default)]
    pub relay_port: u16,

    #[serde(default = "default_discovery_host")]
    pub discovery_host: IpAddr,

    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,

    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    #[serde(default)]
    pub metric: Option<MetricKind>,

    /// Shell command replacing the built-in collector for `metric`
    #[serde(default)]
    pub collector_command: Option<String>,

    /// Port of the HTTP inspection API, disabled when unset
    #[serde(default)]
    pub http_port: Option<u16>,

    /// Print the metrics table on every admitted sample
    #[serde(default = "default_display")]
    pub display: bool,
}

fn default_bind_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_discovery_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_discovery_port() -> u16 {
    9999
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_peer_timeout_secs() -> u64 {
    30
}

fn default_sample_interval_secs() -> u64 {
    5
}

fn default_display() -> bool {
    true
}

impl Config {
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("METRIC_RELAY").try_parsing(true))
            .build()?;

        let settings: Config = match config.try_deserialize() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid environment configuration, using defaults");
                Config::default()
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    /// A peer must survive at least one missed heartbeat
    pub fn validate(&self) -> AppResult<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(AppError::invalid_config("heartbeat interval must be positive"));
        }
        if self.peer_timeout_secs < self.heartbeat_interval_secs.saturating_mul(2) {
            return Err(AppError::invalid_config(&format!(
                "peer timeout ({}s) must be at least twice the heartbeat interval ({}s)",
                self.peer_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        if self.sample_interval_secs == 0 {
            return Err(AppError::invalid_config("sample interval must be positive"));
        }
        Ok(())
    }

    pub fn relay_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.relay_port)
    }

    pub fn discovery_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.discovery_port)
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.discovery_host, self.discovery_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            relay_port: 0,
            discovery_host: default_discovery_host(),
            discovery_port: default_discovery_port(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            sample_interval_secs: default_sample_interval_secs(),
            metric: None,
            collector_command: None,
            http_port: None,
            display: default_display(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.discovery_port, 9999);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.peer_timeout(), Duration::from_secs(30));
        assert_eq!(config.discovery_addr(), "127.0.0.1:9999".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_must_cover_missed_heartbeat() {
        let config = Config {
            heartbeat_interval_secs: 10,
            peer_timeout_secs: 15,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));

        let config = Config {
            heartbeat_interval_secs: 10,
            peer_timeout_secs: 20,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let config = Config {
            heartbeat_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            sample_interval_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
