use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};
use crate::serialization::Format;

/// Zenoh session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZenohConfig {
    /// "client", "peer" or "router".
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default)]
    pub connect: Vec<String>,

    #[serde(default)]
    pub listen: Vec<String>,
}

fn default_mode() -> String {
    "peer".to_string()
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            connect: Vec::new(),
            listen: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings. `RUST_LOG` still wins over `level` at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Replace the configured level, e.g. from a `--log-level` flag.
    pub fn with_level(mut self, level: Option<&str>) -> Self {
        if let Some(level) = level {
            self.level = level.to_string();
        }
        self
    }
}

/// Sections every bridge configuration file carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Payload encoding for published entity states.
    #[serde(default)]
    pub serialization: Format,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Read and parse a JSON5 configuration file.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("cannot read '{}': {}", path.display(), e)))?;
    json5::from_str(&content)
        .map_err(|e| Error::config(format!("cannot parse '{}': {}", path.display(), e)))
}

/// Parse a JSON5 configuration string.
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::config(format!("cannot parse config: {}", e)))
}
