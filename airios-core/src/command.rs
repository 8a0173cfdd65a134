//! Typed node commands.
//!
//! Commands are routed through the same bus domain as polling; the driver
//! encodes them for the addressed model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::BypassMode;

/// Ventilation speed a controller can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedSpeed {
    Off,
    Low,
    Mid,
    High,
    Away,
    Boost,
    Auto,
}

/// Preset whose fan speeds can be reprogrammed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanPreset {
    Away,
    Low,
    Mid,
    High,
}

/// Device reset depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    Soft,
    Factory,
}

/// A state-changing operation addressed to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum NodeCommand {
    SetVentilationSpeed {
        speed: RequestedSpeed,
    },
    SetVentilationSpeedOverride {
        speed: RequestedSpeed,
        minutes: u16,
    },
    SetPresetFanSpeeds {
        preset: FanPreset,
        supply: u8,
        exhaust: u8,
    },
    SetBasicVentilation {
        enabled: bool,
    },
    SetBypassMode {
        mode: BypassMode,
    },
    FilterReset,
    SetPreheaterSetpoint {
        celsius: f64,
    },
    SetFrostProtectionPreheaterSetpoint {
        celsius: f64,
    },
    SetFreeVentilationSetpoint {
        celsius: f64,
    },
    SetFreeVentilationCoolingOffset {
        kelvin: f64,
    },
    Reset {
        mode: ResetMode,
    },
}

/// Discriminant of [`NodeCommand`], used in model descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    SetVentilationSpeed,
    SetVentilationSpeedOverride,
    SetPresetFanSpeeds,
    SetBasicVentilation,
    SetBypassMode,
    FilterReset,
    SetPreheaterSetpoint,
    SetFrostProtectionPreheaterSetpoint,
    SetFreeVentilationSetpoint,
    SetFreeVentilationCoolingOffset,
    Reset,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::SetVentilationSpeed => "set_ventilation_speed",
            CommandKind::SetVentilationSpeedOverride => "set_ventilation_speed_override",
            CommandKind::SetPresetFanSpeeds => "set_preset_fan_speeds",
            CommandKind::SetBasicVentilation => "set_basic_ventilation",
            CommandKind::SetBypassMode => "set_bypass_mode",
            CommandKind::FilterReset => "filter_reset",
            CommandKind::SetPreheaterSetpoint => "set_preheater_setpoint",
            CommandKind::SetFrostProtectionPreheaterSetpoint => {
                "set_frost_protection_preheater_setpoint"
            }
            CommandKind::SetFreeVentilationSetpoint => "set_free_ventilation_setpoint",
            CommandKind::SetFreeVentilationCoolingOffset => "set_free_ventilation_cooling_offset",
            CommandKind::Reset => "reset",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NodeCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            NodeCommand::SetVentilationSpeed { .. } => CommandKind::SetVentilationSpeed,
            NodeCommand::SetVentilationSpeedOverride { .. } => {
                CommandKind::SetVentilationSpeedOverride
            }
            NodeCommand::SetPresetFanSpeeds { .. } => CommandKind::SetPresetFanSpeeds,
            NodeCommand::SetBasicVentilation { .. } => CommandKind::SetBasicVentilation,
            NodeCommand::SetBypassMode { .. } => CommandKind::SetBypassMode,
            NodeCommand::FilterReset => CommandKind::FilterReset,
            NodeCommand::SetPreheaterSetpoint { .. } => CommandKind::SetPreheaterSetpoint,
            NodeCommand::SetFrostProtectionPreheaterSetpoint { .. } => {
                CommandKind::SetFrostProtectionPreheaterSetpoint
            }
            NodeCommand::SetFreeVentilationSetpoint { .. } => {
                CommandKind::SetFreeVentilationSetpoint
            }
            NodeCommand::SetFreeVentilationCoolingOffset { .. } => {
                CommandKind::SetFreeVentilationCoolingOffset
            }
            NodeCommand::Reset { .. } => CommandKind::Reset,
        }
    }

    /// Check argument ranges before the command reaches the bus.
    pub fn validate(&self) -> Result<(), String> {
        fn in_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), String> {
            if value.is_finite() && (min..=max).contains(&value) {
                Ok(())
            } else {
                Err(format!("{} {} outside {}..={}", name, value, min, max))
            }
        }

        match self {
            NodeCommand::SetVentilationSpeedOverride { minutes: 0, .. } => {
                Err("override duration must be at least one minute".to_string())
            }
            NodeCommand::SetBypassMode {
                mode: BypassMode::Unknown,
            } => Err("bypass mode 'unknown' cannot be requested".to_string()),
            NodeCommand::SetPreheaterSetpoint { celsius }
            | NodeCommand::SetFrostProtectionPreheaterSetpoint { celsius } => {
                in_range("preheater setpoint", *celsius, -20.0, 50.0)
            }
            NodeCommand::SetFreeVentilationSetpoint { celsius } => {
                in_range("free ventilation setpoint", *celsius, 0.0, 30.0)
            }
            NodeCommand::SetFreeVentilationCoolingOffset { kelvin } => {
                in_range("cooling offset", *kelvin, 1.0, 10.0)
            }
            _ => Ok(()),
        }
    }
}
