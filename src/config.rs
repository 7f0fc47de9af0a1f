//! Environment-driven server configuration

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_SIGNALING_PORT: u16 = 8443;
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
const DEFAULT_PONG_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// What to do when a connection sends `start` while it already has a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateStartPolicy {
    /// Release the existing session and negotiate a new one
    #[default]
    Replace,
    /// Keep the existing session and reply with an error
    Reject,
}

impl FromStr for DuplicateStartPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub listen_addr: SocketAddr,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub duplicate_start: DuplicateStartPolicy,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_SIGNALING_PORT,
            ),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            pong_timeout: Duration::from_secs(DEFAULT_PONG_TIMEOUT_SECS),
            duplicate_start: DuplicateStartPolicy::default(),
        }
    }
}

impl SignalingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ip: IpAddr = parse_var(&lookup, "FRAMEGATE_ADDR")?.unwrap_or(defaults.listen_addr.ip());
        let port: u16 = parse_var(&lookup, "FRAMEGATE_PORT")?.unwrap_or(DEFAULT_SIGNALING_PORT);

        let ping_interval = parse_var::<u64>(&lookup, "FRAMEGATE_PING_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.ping_interval);
        let pong_timeout = parse_var::<u64>(&lookup, "FRAMEGATE_PONG_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.pong_timeout);
        if ping_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "FRAMEGATE_PING_SECS",
                value: "0".to_string(),
            });
        }

        let duplicate_start =
            parse_var(&lookup, "FRAMEGATE_DUPLICATE_START")?.unwrap_or(defaults.duplicate_start);

        Ok(Self {
            listen_addr: SocketAddr::new(ip, port),
            ping_interval,
            pong_timeout,
            duplicate_start,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => {
            let parsed = raw.trim().parse::<T>();
            match parsed {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(ConfigError::InvalidValue { name, value: raw }),
            }
        }
    }
}
