//! Error types shared across the relay, discovery and agent tasks

use std::net::SocketAddr;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// A component could not bind the socket it requires
    #[error("failed to bind {channel} socket on {addr}: {source}")]
    Bind {
        channel: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("collector error: {0}")]
    Collector(String),

    #[error("unknown metric type: {0}")]
    UnknownMetricKind(String),
}

impl AppError {
    pub fn bind(channel: &'static str, addr: SocketAddr, source: std::io::Error) -> Self {
        AppError::Bind {
            channel,
            addr,
            source,
        }
    }

    pub fn collector(msg: &str) -> Self {
        AppError::Collector(msg.to_string())
    }

    pub fn invalid_config(msg: &str) -> Self {
        AppError::InvalidConfig(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_message() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let err = AppError::bind(
            "relay",
            addr,
            std::io::Error::from(std::io::ErrorKind::AddrInUse),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("failed to bind relay socket on 127.0.0.1:9999"));
    }

    #[test]
    fn test_unknown_metric_kind_message() {
        let err = AppError::UnknownMetricKind("gpu".to_string());
        assert_eq!(err.to_string(), "unknown metric type: gpu");
    }
}
