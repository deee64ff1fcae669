//! # Server Configuration
//!
//! Read once at startup from environment variables. Every variable is
//! optional; unset ones keep the defaults below.
//!
//! | Variable                          | Default        |
//! |-----------------------------------|----------------|
//! | `IDENTICORE_BIND`                 | `0.0.0.0:7070` |
//! | `IDENTICORE_SEND_RATE`            | `10`           |
//! | `IDENTICORE_SEND_PERIOD_SECS`     | `30`           |
//! | `IDENTICORE_CONNECT_RATE`         | `500`          |
//! | `IDENTICORE_CONNECT_PERIOD_SECS`  | `10`           |
//! | `IDENTICORE_JOB_TIMEOUT_SECS`     | `15`           |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value `{value}`")]
    InvalidVar { name: &'static str, value: String },

    #[error("throttle rate limit must be positive")]
    ZeroRate,

    #[error("throttle period must be positive")]
    ZeroPeriod,
}

/// Sliding-window limit: at most `rate` calls per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub rate: usize,
    pub period: Duration,
}

impl RateLimit {
    pub const fn new(rate: usize, period: Duration) -> Self {
        Self { rate, period }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,

    /// Per-client limit on every frame except ping.
    pub send_limit: RateLimit,

    /// Global limit on accepted WebSocket connections.
    pub connect_limit: RateLimit,

    /// How long one recognition job may run before it is answered with
    /// "Timed out".
    pub job_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7070)),
            send_limit: RateLimit::new(10, Duration::from_secs(30)),
            connect_limit: RateLimit::new(500, Duration::from_secs(10)),
            job_timeout: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind: env_or("IDENTICORE_BIND", defaults.bind)?,
            send_limit: RateLimit::new(
                env_or("IDENTICORE_SEND_RATE", defaults.send_limit.rate)?,
                env_secs_or("IDENTICORE_SEND_PERIOD_SECS", defaults.send_limit.period)?,
            ),
            connect_limit: RateLimit::new(
                env_or("IDENTICORE_CONNECT_RATE", defaults.connect_limit.rate)?,
                env_secs_or("IDENTICORE_CONNECT_PERIOD_SECS", defaults.connect_limit.period)?,
            ),
            job_timeout: env_secs_or("IDENTICORE_JOB_TIMEOUT_SECS", defaults.job_timeout)?,
        })
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_var(name, &value),
        Err(_) => Ok(default),
    }
}

fn env_secs_or(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_var::<f64>(name, &value).and_then(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidVar {
                name,
                value: value.clone(),
            })
        }),
        Err(_) => Ok(default),
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        name,
        value: value.to_string(),
    })
}
