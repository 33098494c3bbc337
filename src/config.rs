//! Configuration structures and TOML loading.
//!
//! All startup data lives here: WiFi credentials, broker endpoint, retry
//! parameters and the optional relay/publisher roles. Nothing in this module
//! is mutated after startup; components receive their slice of the
//! configuration by value.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while locating, reading or parsing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not serialize default configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no user configuration directory available")]
    NoConfigDir,
}

/// WiFi network credentials, supplied at startup and never mutated.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub secret: String,
}

impl Default for NetworkCredentials {
    fn default() -> Self {
        Self {
            ssid: "changeme".to_string(),
            secret: "changeme".to_string(),
        }
    }
}

/// Broker endpoint and identity, immutable configuration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// Client identifier sent in CONNECT. Two devices sharing one id will
    /// evict each other's broker session, so deployments with more than one
    /// node must override this.
    pub client_id: String,
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            topic: "test-arduino".to_string(),
            client_id: "ArduinoClient".to_string(),
        }
    }
}

/// Association retry parameters for the link supervisor.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LinkSettings {
    /// Maximum number of status polls before association is reported as
    /// failed. `None` keeps polling forever.
    pub max_attempts: Option<u32>,
    /// Delay between status polls in milliseconds.
    pub attempt_delay_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            max_attempts: Some(20), // 20 polls at 500ms: give up after 10s
            attempt_delay_ms: 500,
        }
    }
}

/// Broker session retry and polling parameters.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// Fixed delay between broker connect attempts in seconds.
    pub retry_delay_secs: u64,
    /// How long a single tick may wait on the transport for inbound traffic,
    /// in milliseconds.
    pub poll_budget_ms: u64,
    /// Whether to subscribe to the configured topic once connected.
    pub subscribe: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_delay_secs: 5,
            poll_budget_ms: 100,
            subscribe: true,
        }
    }
}

/// Relay output role: drive a GPIO pin from inbound `"ON"`/`"OFF"` messages.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RelaySettings {
    /// BCM pin number of the relay.
    pub pin: u8,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self { pin: 1 }
    }
}

/// Periodic publisher role: emit a fixed payload on an interval.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PublisherSettings {
    /// Seconds that must elapse since the last successful send before the
    /// next publish is due.
    pub interval_secs: u64,
    /// Literal payload to publish.
    pub payload: String,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            payload: "ON".to_string(),
        }
    }
}

fn default_cycle_interval_ms() -> u64 {
    100
}

/// Complete device configuration, loaded once at startup.
///
/// The optional `relay` and `publisher` sections select the device role.
/// Both may be enabled on the same node.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub network: NetworkCredentials,

    #[serde(default)]
    pub broker: BrokerEndpoint,

    #[serde(default)]
    pub link: LinkSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<PublisherSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelaySettings>,

    /// Pacing of the cooperative runtime loop in milliseconds.
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            network: NetworkCredentials::default(),
            broker: BrokerEndpoint::default(),
            link: LinkSettings::default(),
            session: SessionSettings::default(),
            publisher: None,
            relay: Some(RelaySettings::default()),
            cycle_interval_ms: default_cycle_interval_ms(),
        }
    }
}

impl DeviceConfig {
    /// Default configuration file location, e.g.
    /// `~/.config/relaylink/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("relaylink").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Loads the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Writes a default configuration file if none exists yet.
    pub fn ensure_default(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let rendered = toml::to_string_pretty(&Self::default())?;
        fs::write(path, rendered).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }
}
