//! Entity state payloads published by the bridge.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Entity platform, the third segment of a state key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Fan,
    Sensor,
    BinarySensor,
    Select,
    Number,
    Switch,
    Button,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Fan => "fan",
            Platform::Sensor => "sensor",
            Platform::BinarySensor => "binary_sensor",
            Platform::Select => "select",
            Platform::Number => "number",
            Platform::Switch => "switch",
            Platform::Button => "button",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fan" => Some(Platform::Fan),
            "sensor" => Some(Platform::Sensor),
            "binary_sensor" => Some(Platform::BinarySensor),
            "select" => Some(Platform::Select),
            "number" => Some(Platform::Number),
            "switch" => Some(Platform::Switch),
            "button" => Some(Platform::Button),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projected entity value. `Null` means unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl StateValue {
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Integer(v) => Some(*v as f64),
            StateValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Integer(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(StateValue::Null)
    }
}

/// State of one entity at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    /// Device identity (RF address).
    pub device: String,
    pub platform: Platform,
    pub key: String,
    pub unique_id: String,
    pub available: bool,
    pub value: StateValue,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl EntityState {
    /// Availability follows the value: a null value is unavailable.
    pub fn new(
        device: impl Into<String>,
        platform: Platform,
        key: impl Into<String>,
        value: StateValue,
    ) -> Self {
        let device = device.into();
        let key = key.into();
        Self {
            timestamp: current_timestamp_millis(),
            unique_id: format!("{}-{}", device, key),
            device,
            platform,
            key,
            available: !value.is_null(),
            value,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Force the entity unavailable regardless of its value.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self.value = StateValue::Null;
        self
    }
}

/// Device registry information for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// RF address, the stable device identity.
    pub identifier: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub model_id: String,
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    /// Identity of the bridge the node is reached through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_device: Option<String>,
}

/// Lifecycle status of the bridge process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Running,
    Degraded,
    Offline,
}

/// Payload of the `@/status` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub bridge: String,
    pub state: BridgeState,
    pub timestamp: i64,
    #[serde(default)]
    pub nodes: usize,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id_and_availability() {
        let state = EntityState::new("0x00ABCD", Platform::Sensor, "co2_level", StateValue::Null);
        assert_eq!(state.unique_id, "0x00ABCD-co2_level");
        assert!(!state.available);

        let state = EntityState::new("0x00ABCD", Platform::Sensor, "co2_level", 640i64.into());
        assert!(state.available);
    }

    #[test]
    fn test_state_value_json() {
        assert_eq!(serde_json::to_string(&StateValue::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&StateValue::from(true)).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&StateValue::from("auto")).unwrap(),
            "\"auto\""
        );
        let none: Option<f64> = None;
        assert!(StateValue::from(none).is_null());
    }

    #[test]
    fn test_platform_parse() {
        for platform in [
            Platform::Fan,
            Platform::BinarySensor,
            Platform::Number,
            Platform::Button,
        ] {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("light"), None);
    }

    #[test]
    fn test_unavailable_clears_value() {
        let state = EntityState::new("0x1", Platform::Switch, "basic_ventilation_enable", true.into())
            .unavailable();
        assert!(!state.available);
        assert!(state.value.is_null());
    }
}
