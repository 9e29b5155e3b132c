//! Runtime configuration.
//!
//! Inflight cap and queue depths have fixed defaults but are exposed as
//! overridable fields on [`RuntimeConfig`], the same way the rest of
//! this codebase prefers a config struct over scattered constants once
//! more than one binary needs to tune them.

use std::num::ParseIntError;

const DEFAULT_MAX_INFLIGHT_REQUESTS: usize = 128;
const DEFAULT_SEND_QUEUE_CAPACITY: usize = 512;
const DEFAULT_MAX_FRAME_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid {0} value: {1}")]
    InvalidValue(&'static str, ParseIntError),
}

/// Connection target plus the tunables governing backpressure and
/// resource limits.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub service_addr: String,
    pub secret: u64,
    pub max_inflight_requests: usize,
    pub send_queue_capacity: usize,
    pub max_frame_payload_size: usize,
}

impl RuntimeConfig {
    /// Builds a config with the default inflight cap and queue depths;
    /// override fields afterwards if a caller needs different tunables.
    pub fn new(service_addr: impl Into<String>, secret: u64) -> Self {
        Self {
            service_addr: service_addr.into(),
            secret,
            max_inflight_requests: DEFAULT_MAX_INFLIGHT_REQUESTS,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            max_frame_payload_size: DEFAULT_MAX_FRAME_PAYLOAD_SIZE,
        }
    }

    /// Reads `SERVICE_ADDR` and `SECRET` from the environment, mirroring
    /// the `PEER_ADDR`-style env-driven bootstrap used by the other
    /// binaries in this codebase.
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_addr = std::env::var("SERVICE_ADDR")
            .map_err(|_| ConfigError::MissingVar("SERVICE_ADDR"))?;
        let secret_str =
            std::env::var("SECRET").map_err(|_| ConfigError::MissingVar("SECRET"))?;
        let secret = secret_str
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue("SECRET", e))?;
        Ok(Self::new(service_addr, secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_defaults() {
        let cfg = RuntimeConfig::new("127.0.0.1:9000", 42);
        assert_eq!(cfg.max_inflight_requests, DEFAULT_MAX_INFLIGHT_REQUESTS);
        assert_eq!(cfg.send_queue_capacity, DEFAULT_SEND_QUEUE_CAPACITY);
        assert_eq!(cfg.secret, 42);
    }
}
