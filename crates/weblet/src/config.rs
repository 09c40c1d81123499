//! Layer and destination configuration.
//!
//! Everything has a default except the port and the destination, which must
//! be supplied before the layer can start.

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Duration;

use crate::bridge::transport::{DEFAULT_REQUEST_TIMEOUT, Destination, Endpoint};

pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct LayerConfig {
    pub host: String,
    /// HTTP port. Zero means unset and makes `start()` fail.
    pub port: u16,
    /// Largest accepted request body, in bytes.
    pub body_limit: usize,
    /// How long `stop()` waits for in-flight requests before closing forcefully.
    pub shutdown_grace: Duration,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            body_limit: DEFAULT_BODY_LIMIT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl LayerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip: IpAddr = self.host.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Read `WEBLET_HOST`, `WEBLET_PORT`, `WEBLET_BODY_LIMIT` and
    /// `WEBLET_SHUTDOWN_GRACE_SECS` from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = lookup("WEBLET_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "WEBLET_PORT")? {
            config.port = port;
        }
        if let Some(limit) = parse_var(&lookup, "WEBLET_BODY_LIMIT")? {
            config.body_limit = limit;
        }
        if let Some(secs) = parse_var(&lookup, "WEBLET_SHUTDOWN_GRACE_SECS")? {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Read `WEBLET_DESTINATION`, `WEBLET_DESTINATION_ID` and
/// `WEBLET_REQUEST_TIMEOUT_SECS` from the environment.
pub fn destination_from_env() -> Result<Destination, ConfigError> {
    destination_from_lookup(|key| std::env::var(key).ok())
}

pub fn destination_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Destination, ConfigError> {
    let raw = lookup("WEBLET_DESTINATION").ok_or(ConfigError::Missing("WEBLET_DESTINATION"))?;
    let endpoint = match raw.parse::<Endpoint>() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            return Err(ConfigError::Invalid {
                key: "WEBLET_DESTINATION",
                reason: e.to_string(),
                value: raw,
            });
        }
    };
    let id = lookup("WEBLET_DESTINATION_ID").unwrap_or_else(|| "destination".to_string());
    let timeout = match parse_var::<u64>(&lookup, "WEBLET_REQUEST_TIMEOUT_SECS")? {
        None => DEFAULT_REQUEST_TIMEOUT,
        Some(0) => {
            return Err(ConfigError::Invalid {
                key: "WEBLET_REQUEST_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Some(secs) => Duration::from_secs(secs),
    };

    Ok(Destination::new(id, endpoint).with_request_timeout(timeout))
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}
