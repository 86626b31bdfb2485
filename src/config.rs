//! Process configuration read from the environment

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// WebSocket liveness probing.
///
/// A ping goes out every `ping_interval`; a connection with no pong after
/// `pong_timeout` is dropped. `pong_timeout` must be shorter than
/// `ping_interval`, otherwise the next tick drops the connection first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub keepalive: Keepalive,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            keepalive: Keepalive::default(),
        }
    }
}

impl Config {
    /// `HOST`, `PORT`, `PING_INTERVAL_SECS`, `PONG_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let host = parse_or(&lookup, "HOST", defaults.bind_addr.ip())?;
        let port = parse_or(&lookup, "PORT", defaults.bind_addr.port())?;
        let ping_secs = parse_or(
            &lookup,
            "PING_INTERVAL_SECS",
            defaults.keepalive.ping_interval.as_secs(),
        )?;
        let pong_secs = parse_or(
            &lookup,
            "PONG_TIMEOUT_SECS",
            defaults.keepalive.pong_timeout.as_secs(),
        )?;

        // tokio's interval panics on a zero period
        if ping_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "PING_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        if pong_secs >= ping_secs {
            return Err(ConfigError::Invalid {
                name: "PONG_TIMEOUT_SECS",
                value: pong_secs.to_string(),
            });
        }

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            keepalive: Keepalive {
                ping_interval: Duration::from_secs(ping_secs),
                pong_timeout: Duration::from_secs(pong_secs),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
