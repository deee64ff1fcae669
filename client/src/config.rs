//! # Client Configuration
//!
//! [`ClientConfig`] carries everything a [`Session`](crate::Session) needs:
//! where the backend lives, how to reconnect, how to keep the socket alive,
//! and how long to wait for a response before giving up on it.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default backend endpoint. Used when nothing else is configured.
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:7070/core/ws";

/// Path of the WebSocket endpoint below the API base.
pub const WS_ENDPOINT_PATH: &str = "/core/ws";

/// Environment variable holding the WebSocket origin (e.g. `wss://example.com`).
pub const ENV_WS_BASE_URL: &str = "IDENTICORE_WS_BASE_URL";

/// Environment variable holding the API prefix (e.g. `/api`).
pub const ENV_API_PATH: &str = "IDENTICORE_API_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("server url must use ws:// or wss://, got `{0}`")]
    UnsupportedScheme(String),
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry after a drop.
    pub initial_delay: Duration,

    /// Upper bound the doubling delay is clamped to.
    pub max_delay: Duration,

    /// Random extra delay added to each wait, up to this much.
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given zero-based attempt, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Ping cadence and the silence after which the socket counts as dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend WebSocket endpoint (`ws://` or `wss://`).
    pub server_url: String,

    pub reconnect: ReconnectPolicy,

    /// `None` disables keepalive pings.
    pub heartbeat: Option<Heartbeat>,

    /// How long a submitted request may stay unanswered. `None` waits forever.
    pub request_timeout: Option<Duration>,

    /// Frames that may wait in the outbound queue while the socket is down.
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            heartbeat: Some(Heartbeat::default()),
            request_timeout: Some(Duration::from_secs(60)),
            outbound_capacity: 16,
        }
    }
}

impl ClientConfig {
    /// Config pointing at an explicit endpoint, defaults elsewhere.
    pub fn new(server_url: &str) -> Result<Self, ConfigError> {
        parse_ws_url(server_url)?;
        Ok(Self {
            server_url: server_url.to_string(),
            ..Self::default()
        })
    }

    /// Checks the endpoint before a session is started with it.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        parse_ws_url(&self.server_url)
    }

    /// Builds the endpoint from `IDENTICORE_WS_BASE_URL` and
    /// `IDENTICORE_API_PATH`, appending `/core/ws`.
    ///
    /// Falls back to [`DEFAULT_SERVER_URL`] when the base is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(ENV_WS_BASE_URL) {
            Ok(base) => {
                let api_path = std::env::var(ENV_API_PATH).unwrap_or_default();
                Self::new(&endpoint_url(&base, &api_path))
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Option<Heartbeat>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}

/// `base` + `api_path` + `/core/ws`, without doubled slashes.
pub fn endpoint_url(base: &str, api_path: &str) -> String {
    let base = base.trim_end_matches('/');
    let api_path = api_path.trim_matches('/');
    if api_path.is_empty() {
        format!("{base}{WS_ENDPOINT_PATH}")
    } else {
        format!("{base}/{api_path}{WS_ENDPOINT_PATH}")
    }
}

fn parse_ws_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_and_api_path() {
        assert_eq!(
            endpoint_url("wss://faces.example.com/", "/api/"),
            "wss://faces.example.com/api/core/ws"
        );
        assert_eq!(
            endpoint_url("ws://localhost:7070", ""),
            "ws://localhost:7070/core/ws"
        );
    }

    #[test]
    fn only_websocket_schemes_are_accepted() {
        assert!(ClientConfig::new("ws://127.0.0.1:1/core/ws").is_ok());
        assert!(matches!(
            ClientConfig::new("https://example.com"),
            Err(ConfigError::UnsupportedScheme(s)) if s == "https"
        ));
        assert!(matches!(
            ClientConfig::new("not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(500), Duration::from_secs(30));
    }

    #[test]
    fn default_config_is_valid() {
        let url = ClientConfig::default().validate().unwrap();
        assert_eq!(url.path(), WS_ENDPOINT_PATH);
    }

    #[test]
    fn outbound_capacity_is_at_least_one() {
        let config = ClientConfig::default().with_outbound_capacity(0);
        assert_eq!(config.outbound_capacity, 1);
    }
}
