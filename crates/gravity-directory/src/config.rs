//! Directory configuration, modeled on `gravity::config::NodeConfig` /
//! `hdds-discovery-server`'s `ServerConfig`: serde defaults, JSON file round
//! trip, and a `validate()` pass before the server binds anything.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// `ServiceDirectoryUrl` — the REQ/REP endpoint this directory binds.
    #[serde(default = "default_bind_url")]
    pub bind_url: String,

    /// `Domain` — the administrative domain this directory is authoritative
    /// for. Entries synced in from peers are tagged with their own domain
    /// and never merged into this one.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Port this directory's own `RegisteredPublishers` channel binds on.
    #[serde(default = "default_publishers_port")]
    pub publishers_channel_port: u16,

    /// Port this directory's own `ServiceDirectory_DomainDetails` channel
    /// binds on.
    #[serde(default = "default_domain_details_port")]
    pub domain_details_port: u16,

    /// `BroadcastEnabled` — whether the UDP beacon pair runs at all.
    #[serde(default)]
    pub broadcast_enabled: bool,

    /// `ServiceDirectoryBroadcastPort`
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,

    /// `ServiceDirectoryBroadcastRate`, in seconds.
    #[serde(default = "default_broadcast_rate_secs")]
    pub broadcast_rate_secs: u64,

    /// `DomainSyncList` — domains this directory's synchronizer accepts
    /// beacons from. Empty means accept beacons from any domain.
    #[serde(default)]
    pub domain_sync_list: Vec<String>,

    /// Per-attempt timeout for a peer directory sync round trip.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    #[serde(default = "default_network_retries")]
    pub network_retries: u32,
}

fn default_bind_url() -> String {
    "tcp://*:5555".to_string()
}

fn default_domain() -> String {
    "default".to_string()
}

fn default_publishers_port() -> u16 {
    5556
}

fn default_domain_details_port() -> u16 {
    5558
}

fn default_broadcast_port() -> u16 {
    5557
}

fn default_broadcast_rate_secs() -> u64 {
    5
}

fn default_network_timeout_ms() -> u64 {
    1000
}

fn default_network_retries() -> u32 {
    3
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind_url: default_bind_url(),
            domain: default_domain(),
            publishers_channel_port: default_publishers_port(),
            domain_details_port: default_domain_details_port(),
            broadcast_enabled: false,
            broadcast_port: default_broadcast_port(),
            broadcast_rate_secs: default_broadcast_rate_secs(),
            domain_sync_list: Vec::new(),
            network_timeout_ms: default_network_timeout_ms(),
            network_retries: default_network_retries(),
        }
    }
}

impl DirectoryConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn broadcast_rate(&self) -> Duration {
        Duration::from_secs(self.broadcast_rate_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// The bind address with `localhost`/`*` rewritten to a literal
    /// interface address, the same substitution `gravity::config` applies
    /// to a node's directory URL.
    pub fn bind_addr(&self) -> String {
        gravity::config::rewrite_localhost(&self.bind_url)
            .replace("tcp://*:", "0.0.0.0:")
            .replace("tcp://", "")
    }

    /// The loopback URL an embedded node should use to talk back to this
    /// directory once it is accepting connections.
    pub fn loopback_url(&self) -> String {
        let port = self
            .bind_url
            .rsplit(':')
            .next()
            .unwrap_or("5555")
            .to_string();
        format!("tcp://127.0.0.1:{port}")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.domain.is_empty() {
            return Err(ConfigError::InvalidValue("domain cannot be empty".into()));
        }
        if self.network_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "network_retries cannot be 0".into(),
            ));
        }
        if self.broadcast_enabled && self.broadcast_port == 0 {
            return Err(ConfigError::InvalidValue(
                "broadcast_port cannot be 0 when broadcast is enabled".into(),
            ));
        }
        if self.publishers_channel_port == self.domain_details_port {
            return Err(ConfigError::InvalidValue(
                "publishers_channel_port and domain_details_port must differ".into(),
            ));
        }
        Ok(())
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DirectoryConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_colliding_channel_ports() {
        let config = DirectoryConfig {
            domain_details_port: 5556,
            publishers_channel_port: 5556,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loopback_url_keeps_configured_port() {
        let config = DirectoryConfig {
            bind_url: "tcp://*:6000".into(),
            ..Default::default()
        };
        assert_eq!(config.loopback_url(), "tcp://127.0.0.1:6000");
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directory.json");
        let config = DirectoryConfig {
            domain: "Lab1".into(),
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        let back = DirectoryConfig::from_file(&path).unwrap();
        assert_eq!(back.domain, "Lab1");
    }
}
