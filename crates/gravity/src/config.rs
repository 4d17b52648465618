//! Node configuration: the string-typed config keys of the original system
//! expressed as a typed, validated struct with serde defaults.
//!
//! Modeled directly on `hdds-discovery-server`'s `ServerConfig`: every field
//! has a `#[serde(default = "...")]` function, the struct round-trips
//! through JSON via `from_file`/`to_file`, and `validate()` rejects
//! nonsensical combinations before a node tries to use them.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of times an outbound directory/service round trip is
/// retried before giving up.
pub const NETWORK_RETRIES: u32 = 3;

/// Default per-attempt timeout for an outbound directory/service round trip.
pub const NETWORK_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `ServiceDirectoryUrl` — directory REQ/REP endpoint.
    #[serde(default = "default_directory_url")]
    pub service_directory_url: String,

    /// `Domain` — administrative domain this node belongs to.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Per-attempt timeout for directory/service round trips.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Retry budget for directory/service round trips.
    #[serde(default = "default_network_retries")]
    pub network_retries: u32,
}

fn default_directory_url() -> String {
    "tcp://127.0.0.1:5555".to_string()
}

fn default_domain() -> String {
    "default".to_string()
}

fn default_network_timeout_ms() -> u64 {
    NETWORK_TIMEOUT.as_millis() as u64
}

fn default_network_retries() -> u32 {
    NETWORK_RETRIES
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_directory_url: default_directory_url(),
            domain: default_domain(),
            network_timeout_ms: default_network_timeout_ms(),
            network_retries: default_network_retries(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Rewrite `localhost` to `127.0.0.1` the way the original directory
    /// bind logic does, so the same config can be used for both binding and
    /// connecting.
    pub fn directory_url(&self) -> String {
        rewrite_localhost(&self.service_directory_url)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.is_empty() {
            return Err(ConfigError::InvalidValue("domain cannot be empty".into()));
        }
        if !self
            .domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.')
        {
            return Err(ConfigError::InvalidValue(
                "domain must be alphanumeric or '.'".into(),
            ));
        }
        if self.network_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "network_retries cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Rewrite `tcp://localhost:PORT` (or a bare `localhost:PORT`) to use
/// `127.0.0.1`, matching the original directory's bind-time substitution.
pub fn rewrite_localhost(url: &str) -> String {
    url.replace("localhost", "127.0.0.1")
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {s}"),
            Self::Parse(s) => write!(f, "parse error: {s}"),
            Self::Serialize(s) => write!(f, "serialize error: {s}"),
            Self::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
