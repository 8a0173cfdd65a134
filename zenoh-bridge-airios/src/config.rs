//! Configuration for the Airios bridge.

use std::path::Path;
use std::time::Duration;

use airios_common::config::{LoggingConfig, ZenohConfig};
use airios_common::{Format, KEY_PREFIX};
use airios_core::binding::BindTiming;
use airios_core::coordinator::{DEFAULT_SCAN_INTERVAL, MAX_SCAN_INTERVAL, MIN_SCAN_INTERVAL};
use airios_core::flow::BindingRecord;
use airios_core::model::ModelFamily;
use airios_core::{BindRole, NodeAddress};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiriosBridgeConfig {
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Payload encoding for entity states.
    #[serde(default)]
    pub serialization: Format,

    #[serde(default)]
    pub logging: LoggingConfig,

    pub bridge: BridgeConfig,
}

/// The Airios bridge and its bound nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Key expression prefix (default: "airios")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    pub connection: ConnectionConfig,

    /// Modbus address of the bridge itself.
    #[serde(default = "default_bus_address")]
    pub bus_address: u8,

    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    #[serde(default)]
    pub bind: BindTiming,

    /// Readings older than this are published as unavailable.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,

    /// Nodes bound through the bind flow.
    #[serde(default)]
    pub bindings: Vec<BindingRecord>,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_bus_address() -> u8 {
    207
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL.as_secs()
}

/// How the bridge is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// RS-485 serial line
    Serial {
        /// Serial device path (e.g., "/dev/ttyUSB0")
        device: String,
    },
    /// Ethernet bridge over Modbus TCP
    Network {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Built-in simulated bridge for demos and testing
    Simulated {
        #[serde(default)]
        nodes: Vec<SimulatedNode>,
        /// Status polls reported as in progress before a bind completes.
        #[serde(default = "default_bind_polls")]
        bind_polls: u32,
    },
}

fn default_host() -> String {
    "192.168.1.254".to_string()
}

fn default_modbus_port() -> u16 {
    502
}

fn default_bind_polls() -> u32 {
    8
}

impl ConnectionConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionConfig::Serial { .. } => "serial",
            ConnectionConfig::Network { .. } => "network",
            ConnectionConfig::Simulated { .. } => "simulated",
        }
    }
}

/// A node pre-bound on the simulated bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedNode {
    pub address: NodeAddress,
    pub model: ModelFamily,
    pub rf_address: u32,
}

impl AiriosBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AiriosBridgeConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;

        if bridge.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "key_prefix cannot be empty".to_string(),
            ));
        }

        NodeAddress::new(bridge.bus_address).ok_or_else(|| {
            ConfigError::Validation(format!(
                "bus_address {} must be 1-247",
                bridge.bus_address
            ))
        })?;

        let interval = bridge.scan_interval();
        if !(MIN_SCAN_INTERVAL..=MAX_SCAN_INTERVAL).contains(&interval) {
            return Err(ConfigError::Validation(format!(
                "scan_interval_secs must be {}-{}",
                MIN_SCAN_INTERVAL.as_secs(),
                MAX_SCAN_INTERVAL.as_secs()
            )));
        }

        if bridge.bind.poll_interval.is_zero()
            || bridge.bind.controller_polls == 0
            || bridge.bind.accessory_polls == 0
        {
            return Err(ConfigError::Validation(
                "bind timing values must be positive".to_string(),
            ));
        }

        for record in &bridge.bindings {
            if record.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "binding at address {}: name cannot be empty",
                    record.address
                )));
            }
            let duplicates = bridge
                .bindings
                .iter()
                .filter(|r| r.address == record.address || r.rf_address == record.rf_address)
                .count();
            if duplicates > 1 {
                return Err(ConfigError::Validation(format!(
                    "binding '{}': address {} or RF address {} is used twice",
                    record.name, record.address, record.rf_address
                )));
            }
        }

        if let ConnectionConfig::Simulated { nodes, .. } = &bridge.connection {
            for node in nodes {
                if node.address.get() == bridge.bus_address {
                    return Err(ConfigError::Validation(format!(
                        "simulated node at {} collides with the bridge bus address",
                        node.address
                    )));
                }
                if node.model.role() == airios_core::NodeRole::Bridge {
                    return Err(ConfigError::Validation(format!(
                        "simulated node at {} cannot be a bridge",
                        node.address
                    )));
                }
            }
        }

        Ok(())
    }
}

impl BridgeConfig {
    pub fn bus_address(&self) -> Option<NodeAddress> {
        NodeAddress::new(self.bus_address)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }

    /// Controller bindings, the only valid pairing targets for accessories.
    pub fn controllers(&self) -> impl Iterator<Item = &BindingRecord> {
        self.bindings
            .iter()
            .filter(|r| r.role == BindRole::Controller)
    }
}
