//! Semantic field vocabulary of a node snapshot.
//!
//! The driver maps registers to these keys; the core never sees raw
//! register addresses.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::CapabilitySet;

/// Fixed vocabulary of polled fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    VentilationSpeed,
    IndoorAirTemperature,
    OutdoorAirTemperature,
    ExhaustAirTemperature,
    SupplyAirTemperature,
    ExhaustFanRpm,
    SupplyFanRpm,
    SupplyFanSpeed,
    ExhaustFanSpeed,
    ErrorCode,
    FilterDurationDays,
    FilterRemainingDays,
    FilterRemainingPercent,
    FilterDirty,
    Defrost,
    BypassPosition,
    BypassMode,
    Postheater,
    OverrideRemainingTime,
    BasicVentilationEnable,
    Co2Level,
    Co2ControlSetpoint,
    PreheaterSetpoint,
    FrostProtectionPreheaterSetpoint,
    FreeVentilationSetpoint,
    FreeVentilationCoolingOffset,
    RfLoadLastHour,
    RfLoadCurrentHour,
    RfSentMessagesLastHour,
    RfSentMessagesCurrentHour,
    PowerOnTime,
    FaultStatus,
    RfCommStatus,
    BatteryStatus,
    Capabilities,
}

impl Field {
    /// Return the snake_case key for this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::VentilationSpeed => "ventilation_speed",
            Field::IndoorAirTemperature => "indoor_air_temperature",
            Field::OutdoorAirTemperature => "outdoor_air_temperature",
            Field::ExhaustAirTemperature => "exhaust_air_temperature",
            Field::SupplyAirTemperature => "supply_air_temperature",
            Field::ExhaustFanRpm => "exhaust_fan_rpm",
            Field::SupplyFanRpm => "supply_fan_rpm",
            Field::SupplyFanSpeed => "supply_fan_speed",
            Field::ExhaustFanSpeed => "exhaust_fan_speed",
            Field::ErrorCode => "error_code",
            Field::FilterDurationDays => "filter_duration_days",
            Field::FilterRemainingDays => "filter_remaining_days",
            Field::FilterRemainingPercent => "filter_remaining_percent",
            Field::FilterDirty => "filter_dirty",
            Field::Defrost => "defrost",
            Field::BypassPosition => "bypass_position",
            Field::BypassMode => "bypass_mode",
            Field::Postheater => "postheater",
            Field::OverrideRemainingTime => "override_remaining_time",
            Field::BasicVentilationEnable => "basic_ventilation_enable",
            Field::Co2Level => "co2_level",
            Field::Co2ControlSetpoint => "co2_control_setpoint",
            Field::PreheaterSetpoint => "preheater_setpoint",
            Field::FrostProtectionPreheaterSetpoint => "frost_protection_preheater_setpoint",
            Field::FreeVentilationSetpoint => "free_ventilation_setpoint",
            Field::FreeVentilationCoolingOffset => "free_ventilation_cooling_offset",
            Field::RfLoadLastHour => "rf_load_last_hour",
            Field::RfLoadCurrentHour => "rf_load_current_hour",
            Field::RfSentMessagesLastHour => "rf_sent_messages_last_hour",
            Field::RfSentMessagesCurrentHour => "rf_sent_messages_current_hour",
            Field::PowerOnTime => "power_on_time",
            Field::FaultStatus => "fault_status",
            Field::RfCommStatus => "rf_comm_status",
            Field::BatteryStatus => "battery_status",
            Field::Capabilities => "capabilities",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status metadata attached to a polled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultStatus {
    /// Time since the bridge last received this value over RF.
    pub age: Duration,
    /// Driver-reported value source code.
    pub source: u8,
    /// Driver-reported status flags.
    pub flags: u8,
}

/// A non-null polled value with optional status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,
}

impl Reading {
    /// A reading without status metadata.
    pub fn new(value: FieldValue) -> Self {
        Self {
            value,
            status: None,
        }
    }

    /// Attach status metadata.
    pub fn with_status(mut self, status: ResultStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Temperature sensor health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Ok,
    NotOk,
    Unavailable,
}

/// Heater health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaterStatus {
    Ok,
    Error,
    Unavailable,
}

/// Ventilation speed as reported by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VentilationSpeed {
    Off,
    Low,
    Mid,
    High,
    OverrideLow,
    OverrideMid,
    OverrideHigh,
    Away,
    Boost,
    Auto,
}

/// Controller error register, decoded by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoError,
    NonSpecificFault,
    EmergencyStop,
    Fan1Error,
    Fan2Error,
    X20SensorError,
    X21SensorError,
    X22SensorError,
    X23SensorError,
    BindingModeActive,
    IdentificationActive,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "no_error",
            ErrorCode::NonSpecificFault => "non_specific_fault",
            ErrorCode::EmergencyStop => "emergency_stop",
            ErrorCode::Fan1Error => "fan_1_error",
            ErrorCode::Fan2Error => "fan_2_error",
            ErrorCode::X20SensorError => "x20_sensor_error",
            ErrorCode::X21SensorError => "x21_sensor_error",
            ErrorCode::X22SensorError => "x22_sensor_error",
            ErrorCode::X23SensorError => "x23_sensor_error",
            ErrorCode::BindingModeActive => "binding_mode_active",
            ErrorCode::IdentificationActive => "identification_active",
        }
    }
}

/// Bypass damper mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassMode {
    Open,
    Close,
    Auto,
    Unknown,
}

impl BypassMode {
    /// Option name used by the bypass mode select.
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassMode::Open => "open",
            BypassMode::Close => "close",
            BypassMode::Auto => "auto",
            BypassMode::Unknown => "unknown",
        }
    }

    /// Parse a select option; `unknown` is not selectable.
    pub fn from_option(option: &str) -> Option<Self> {
        match option {
            "open" => Some(BypassMode::Open),
            "close" => Some(BypassMode::Close),
            "auto" => Some(BypassMode::Auto),
            _ => None,
        }
    }
}

/// Typed value of a polled field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Duration(Duration),
    ErrorCode(ErrorCode),
    Temperature { celsius: f64, status: SensorStatus },
    BypassPosition { position: u8, error: bool },
    Heater { level: u8, status: HeaterStatus },
    Battery { available: bool, low: bool },
    Fault { available: bool, fault: bool },
    Speed(VentilationSpeed),
    BypassMode(BypassMode),
    Capabilities(CapabilitySet),
}

impl FieldValue {
    /// Numeric view for plain integer and float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_key_matches_serde() {
        for field in [
            Field::IndoorAirTemperature,
            Field::FrostProtectionPreheaterSetpoint,
            Field::RfSentMessagesCurrentHour,
            Field::Co2Level,
        ] {
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(json, format!("\"{}\"", field.as_str()));
        }
    }

    #[test]
    fn test_bypass_mode_options() {
        assert_eq!(BypassMode::from_option("open"), Some(BypassMode::Open));
        assert_eq!(BypassMode::from_option("unknown"), None);
        assert_eq!(BypassMode::Close.as_str(), "close");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(FieldValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::Bool(true).as_f64(), None);
    }
}
