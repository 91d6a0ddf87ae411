use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Upper bound on the dial retry schedule.
const MAX_RETRY_DELAYS: usize = 10;

/// What the watchdog does when `Connecting` outlives `connect_watchdog_ms`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogPolicy {
    /// Log a warning and emit an event; the attempt keeps racing the transport.
    #[default]
    Diagnostic,
    /// Abort the attempt and mark it `Failed`.
    Authoritative,
}

/// What happens when a requested media permission is denied.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Abort the attempt with a permission error.
    #[default]
    RequireMedia,
    /// Join anyway, without publishing the denied tracks.
    ContinueWithoutMedia,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }
}

/// Static configuration for a session manager.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_signaling_address")]
    pub default_signaling_address: String,
    #[serde(default = "default_path_suffix")]
    pub signaling_path_suffix: Option<String>,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_watchdog_ms")]
    pub connect_watchdog_ms: u64,
    #[serde(default)]
    pub watchdog_policy: WatchdogPolicy,
    #[serde(default)]
    pub permission_policy: PermissionPolicy,
    #[serde(default = "default_true")]
    pub auto_subscribe: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.ozzu.world".to_string()
}

fn default_signaling_address() -> String {
    "ws://localhost:7880".to_string()
}

fn default_path_suffix() -> Option<String> {
    Some("/rtc".to_string())
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![
        IceServer::stun("stun:stun.l.google.com:19302"),
        IceServer::stun("stun:stun1.l.google.com:19302"),
    ]
}

fn default_retry_delays() -> Vec<u64> {
    vec![1_000, 3_000, 5_000]
}

fn default_watchdog_ms() -> u64 {
    15_000
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_signaling_address: default_signaling_address(),
            signaling_path_suffix: default_path_suffix(),
            ice_servers: default_ice_servers(),
            retry_delays_ms: default_retry_delays(),
            connect_watchdog_ms: default_watchdog_ms(),
            watchdog_policy: WatchdogPolicy::default(),
            permission_policy: PermissionPolicy::default(),
            auto_subscribe: true,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SessionError::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| SessionError::Config(format!("base_url '{}': {e}", self.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SessionError::Config(format!(
                "base_url must be http(s), got '{}'",
                base.scheme()
            )));
        }
        if self.default_signaling_address.trim().is_empty() {
            return Err(SessionError::Config(
                "default_signaling_address must not be empty".into(),
            ));
        }
        if self.ice_servers.len() < 2 {
            return Err(SessionError::Config(format!(
                "at least two ICE servers are required, got {}",
                self.ice_servers.len()
            )));
        }
        if self.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err(SessionError::Config("ICE server without urls".into()));
        }
        if self.retry_delays_ms.len() > MAX_RETRY_DELAYS {
            return Err(SessionError::Config(format!(
                "at most {MAX_RETRY_DELAYS} retry delays allowed"
            )));
        }
        if self.connect_watchdog_ms == 0 {
            return Err(SessionError::Config("connect_watchdog_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_watchdog_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.retry_delays_ms.iter().map(|ms| Duration::from_millis(*ms))
    }

    /// Full URL of the token issuance endpoint.
    pub fn token_endpoint(&self) -> String {
        format!("{}/livekit/token", self.base_url.trim_end_matches('/'))
    }
}
