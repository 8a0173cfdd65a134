//! Entity projection: which entities a node exposes and what they read.
//!
//! Reads the snapshot and the Model Directory only. Any value that cannot
//! be shown (null, failed sensor, stale reading) makes the entity
//! unavailable; nothing here returns an error for bad data.

use std::time::Duration;

use airios_common::{DeviceInfo, EntityState, Platform, StateValue};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::address::{NodeAddress, RfAddress};
use crate::command::{NodeCommand, RequestedSpeed};
use crate::field::{BypassMode, Field, FieldValue, HeaterStatus, Reading, SensorStatus, VentilationSpeed};
use crate::model::{Capability, CapabilitySet, ModelDirectory, ModelFamily, NodeRole};
use crate::snapshot::{NodeRecord, NodeSnapshotStore};

const MANUFACTURER: &str = "Airios";

/// Minutes applied by the timed override presets.
pub const PRESET_OVERRIDE_MINUTES: u16 = 60;

/// Inclusive range and step of a number entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Static description of one entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityDescription {
    pub platform: Platform,
    pub key: &'static str,
    pub field: Option<Field>,
    pub unit: Option<&'static str>,
    pub range: Option<NumberRange>,
    pub options: &'static [&'static str],
    /// Only materialized when the node has this capability.
    pub requires: Option<Capability>,
}

impl EntityDescription {
    const fn of(platform: Platform, field: Field, key: &'static str) -> Self {
        Self {
            platform,
            key,
            field: Some(field),
            unit: None,
            range: None,
            options: &[],
            requires: None,
        }
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    const fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some(NumberRange { min, max, step: 1.0 });
        self
    }

    const fn requires(mut self, capability: Capability) -> Self {
        self.requires = Some(capability);
        self
    }
}

const fn sensor(field: Field, key: &'static str) -> EntityDescription {
    EntityDescription::of(Platform::Sensor, field, key)
}

const fn binary(field: Field, key: &'static str) -> EntityDescription {
    EntityDescription::of(Platform::BinarySensor, field, key)
}

const fn number(field: Field, key: &'static str) -> EntityDescription {
    EntityDescription::of(Platform::Number, field, key)
}

const CELSIUS: &str = "°C";
const PERCENT: &str = "%";
const RPM: &str = "rpm";
const PPM: &str = "ppm";

const FAN: EntityDescription =
    EntityDescription::of(Platform::Fan, Field::VentilationSpeed, "ventilation_speed");

const FILTER_RESET: EntityDescription = EntityDescription {
    platform: Platform::Button,
    key: "filter_reset",
    field: None,
    unit: None,
    range: None,
    options: &[],
    requires: None,
};

const COMMON: &[EntityDescription] = &[
    binary(Field::FaultStatus, "fault_status"),
    binary(Field::RfCommStatus, "rf_comm_status"),
];

const BRIDGE: &[EntityDescription] = &[
    sensor(Field::RfLoadLastHour, "rf_load_last_hour").unit(PERCENT),
    sensor(Field::RfLoadCurrentHour, "rf_load_current_hour").unit(PERCENT),
    sensor(Field::RfSentMessagesLastHour, "rf_sent_messages_last_hour"),
    sensor(Field::RfSentMessagesCurrentHour, "rf_sent_messages_current_hour"),
    sensor(Field::PowerOnTime, "power_on_time").unit("s"),
];

const FREE_VENTILATION: &[EntityDescription] = &[
    number(Field::FreeVentilationSetpoint, "free_ventilation_setpoint")
        .unit(CELSIUS)
        .range(0.0, 30.0),
    number(Field::FreeVentilationCoolingOffset, "free_ventilation_cooling_offset").range(1.0, 10.0),
];

const VMD_02: &[EntityDescription] = &[
    FAN,
    sensor(Field::IndoorAirTemperature, "indoor_air_temperature").unit(CELSIUS),
    sensor(Field::OutdoorAirTemperature, "outdoor_air_temperature").unit(CELSIUS),
    sensor(Field::ExhaustAirTemperature, "exhaust_air_temperature").unit(CELSIUS),
    sensor(Field::SupplyAirTemperature, "supply_air_temperature").unit(CELSIUS),
    sensor(Field::ExhaustFanRpm, "exhaust_fan_rpm").unit(RPM),
    sensor(Field::SupplyFanRpm, "supply_fan_rpm").unit(RPM),
    sensor(Field::SupplyFanSpeed, "supply_fan_speed").unit(PERCENT),
    sensor(Field::ExhaustFanSpeed, "exhaust_fan_speed").unit(PERCENT),
    sensor(Field::ErrorCode, "error_code"),
    sensor(Field::FilterDurationDays, "filter_duration_days").unit("d"),
    sensor(Field::FilterRemainingPercent, "filter_remaining_percent").unit(PERCENT),
    sensor(Field::BypassPosition, "bypass_position").unit(PERCENT),
    sensor(Field::Postheater, "postheater").unit(PERCENT),
    sensor(Field::OverrideRemainingTime, "override_remaining_time").unit("min"),
    binary(Field::FilterDirty, "filter_dirty"),
    binary(Field::Defrost, "defrost"),
    EntityDescription {
        options: &["close", "open", "auto"],
        ..EntityDescription::of(Platform::Select, Field::BypassMode, "bypass_mode")
    },
    number(Field::PreheaterSetpoint, "preheater_setpoint")
        .unit(CELSIUS)
        .range(-20.0, 50.0)
        .requires(Capability::Preheater),
    number(
        Field::FrostProtectionPreheaterSetpoint,
        "frost_protection_preheater_setpoint",
    )
    .unit(CELSIUS)
    .range(-20.0, 50.0)
    .requires(Capability::Preheater),
    FILTER_RESET,
];

const VMD_07: &[EntityDescription] = &[
    FAN,
    sensor(Field::IndoorAirTemperature, "indoor_air_temperature").unit(CELSIUS),
    sensor(Field::ExhaustAirTemperature, "exhaust_air_temperature").unit(CELSIUS),
    sensor(Field::SupplyAirTemperature, "supply_air_temperature").unit(CELSIUS),
    sensor(Field::SupplyFanSpeed, "supply_fan_speed").unit(PERCENT),
    sensor(Field::ExhaustFanSpeed, "exhaust_fan_speed").unit(PERCENT),
    sensor(Field::ErrorCode, "error_code"),
    sensor(Field::FilterRemainingDays, "filter_remaining_days").unit("d"),
    sensor(Field::FilterRemainingPercent, "filter_remaining_percent").unit(PERCENT),
    sensor(Field::BypassPosition, "bypass_position"),
    sensor(Field::Co2Level, "co2_level").unit(PPM),
    sensor(Field::Co2ControlSetpoint, "co2_control_setpoint").unit(PPM),
    binary(Field::FilterDirty, "filter_dirty"),
    binary(Field::BasicVentilationEnable, "basic_ventilation_enable"),
    EntityDescription::of(
        Platform::Switch,
        Field::BasicVentilationEnable,
        "basic_ventilation_enable",
    ),
    FILTER_RESET,
];

const VMN_05: &[EntityDescription] = &[binary(Field::BatteryStatus, "battery_status")];

/// Every entity a family can expose, before capability filtering.
pub fn entity_table(family: ModelFamily) -> Vec<EntityDescription> {
    let specific: &[&[EntityDescription]] = match family {
        ModelFamily::Brdg02R13 => &[BRIDGE],
        ModelFamily::Vmd02Rps78 => &[VMD_02, FREE_VENTILATION],
        ModelFamily::Vmd07Rps13 => &[VMD_07, FREE_VENTILATION],
        ModelFamily::Vmn05Lm02 => &[VMN_05],
    };
    specific
        .iter()
        .flat_map(|t| t.iter())
        .chain(COMMON.iter())
        .copied()
        .collect()
}

/// Preset name shown for a reported speed.
pub fn preset_name(speed: VentilationSpeed) -> &'static str {
    match speed {
        VentilationSpeed::Off => "off",
        VentilationSpeed::Low => "low",
        VentilationSpeed::Mid => "medium",
        VentilationSpeed::High => "high",
        VentilationSpeed::OverrideLow => "low_override",
        VentilationSpeed::OverrideMid => "medium_override",
        VentilationSpeed::OverrideHigh => "high_override",
        VentilationSpeed::Away => "away",
        VentilationSpeed::Boost => "boost",
        VentilationSpeed::Auto => "auto",
    }
}

/// Fan presets offered for a capability set, in display order.
pub fn fan_preset_modes(capabilities: CapabilitySet) -> Vec<&'static str> {
    let mut modes = vec!["low", "medium", "high"];
    for (capability, preset) in [
        (Capability::Off, "off"),
        (Capability::Auto, "auto"),
        (Capability::Away, "away"),
        (Capability::Boost, "boost"),
    ] {
        if capabilities.contains(capability) {
            modes.push(preset);
        }
    }
    if capabilities.contains(Capability::TimerOverride) {
        modes.extend(["low_override", "medium_override", "high_override"]);
    }
    modes
}

/// Command for a preset name; override presets become a timed override.
pub fn preset_command(preset: &str) -> Option<NodeCommand> {
    let speed = |speed| Some(NodeCommand::SetVentilationSpeed { speed });
    let timed = |speed| {
        Some(NodeCommand::SetVentilationSpeedOverride {
            speed,
            minutes: PRESET_OVERRIDE_MINUTES,
        })
    };
    match preset {
        "off" => speed(RequestedSpeed::Off),
        "low" => speed(RequestedSpeed::Low),
        "medium" => speed(RequestedSpeed::Mid),
        "high" => speed(RequestedSpeed::High),
        "away" => speed(RequestedSpeed::Away),
        "boost" => speed(RequestedSpeed::Boost),
        "auto" => speed(RequestedSpeed::Auto),
        "low_override" => timed(RequestedSpeed::Low),
        "medium_override" => timed(RequestedSpeed::Mid),
        "high_override" => timed(RequestedSpeed::High),
        _ => None,
    }
}

/// Display value of a field; `Null` where the value must not be shown.
pub fn project_value(field: Field, value: &FieldValue) -> StateValue {
    match (field, value) {
        (_, FieldValue::Temperature { celsius, status }) => match status {
            SensorStatus::Ok => StateValue::Float(*celsius),
            _ => StateValue::Null,
        },
        (_, FieldValue::BypassPosition { position, error }) => {
            if *error {
                StateValue::Null
            } else {
                StateValue::Integer(i64::from(*position))
            }
        }
        (_, FieldValue::Heater { level, status }) => match status {
            HeaterStatus::Ok => StateValue::Integer(i64::from(*level)),
            _ => StateValue::Null,
        },
        (_, FieldValue::Battery { available, low }) => {
            if *available {
                StateValue::Bool(*low)
            } else {
                StateValue::Null
            }
        }
        (_, FieldValue::Fault { available, fault }) => {
            if *available {
                StateValue::Bool(*fault)
            } else {
                StateValue::Null
            }
        }
        (Field::OverrideRemainingTime, FieldValue::Integer(0)) => StateValue::Null,
        (Field::RfCommStatus, FieldValue::Integer(status)) => match status {
            0 => StateValue::Bool(true),
            1 => StateValue::Bool(false),
            _ => StateValue::Null,
        },
        (_, FieldValue::Integer(v)) => StateValue::Integer(*v),
        (_, FieldValue::Float(v)) if v.is_finite() => StateValue::Float(*v),
        (_, FieldValue::Float(_)) => StateValue::Null,
        (_, FieldValue::Bool(v)) => StateValue::Bool(*v),
        (_, FieldValue::Duration(d)) => StateValue::Integer(d.as_secs() as i64),
        (_, FieldValue::ErrorCode(code)) => StateValue::Text(code.as_str().to_string()),
        (_, FieldValue::Speed(speed)) => StateValue::Text(preset_name(*speed).to_string()),
        (_, FieldValue::BypassMode(BypassMode::Unknown)) => StateValue::Null,
        (_, FieldValue::BypassMode(mode)) => StateValue::Text(mode.as_str().to_string()),
        (_, FieldValue::Capabilities(_)) => StateValue::Null,
    }
}

/// A node as the host sees it: device info plus its entities.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedDevice {
    pub address: NodeAddress,
    pub rf_address: RfAddress,
    pub info: DeviceInfo,
    /// `None` for unsupported products; such nodes expose no entities.
    pub family: Option<ModelFamily>,
    pub capabilities: CapabilitySet,
    pub entities: Vec<EntityDescription>,
}

impl ProjectedDevice {
    pub fn identifier(&self) -> String {
        self.rf_address.to_string()
    }

    pub fn entity(&self, platform: Platform, key: &str) -> Option<&EntityDescription> {
        self.entities
            .iter()
            .find(|e| e.platform == platform && e.key == key)
    }
}

/// Errors for commands arriving from entity handlers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EntityCommandError {
    #[error("No {platform} entity '{key}' on this device")]
    UnknownEntity { platform: Platform, key: String },

    #[error("Entity '{key}' is read-only")]
    ReadOnly { key: String },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidPayload { key: String, reason: String },

    #[error("Preset '{0}' is not available on this device")]
    PresetNotSupported(String),
}

/// Projection settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Projection {
    /// Readings older than this are unavailable. `None` disables the check.
    pub stale_after: Option<Duration>,
}

impl Projection {
    pub fn new(stale_after: Option<Duration>) -> Self {
        Self { stale_after }
    }

    /// Devices to register, in bus address order.
    ///
    /// Nodes without an RF address or product identifier are skipped.
    pub fn devices(
        &self,
        snapshot: &NodeSnapshotStore,
        models: &ModelDirectory,
    ) -> Vec<ProjectedDevice> {
        let bridge_rf = snapshot.all().find_map(|(_, record)| {
            let product = record.identity.product_id?;
            let model = models.resolve(product).ok()?;
            (model.role == NodeRole::Bridge)
                .then_some(record.identity.rf_address)
                .flatten()
        });

        snapshot
            .all()
            .filter_map(|(_, record)| self.device(record, models, bridge_rf))
            .collect()
    }

    fn device(
        &self,
        record: &NodeRecord,
        models: &ModelDirectory,
        bridge_rf: Option<RfAddress>,
    ) -> Option<ProjectedDevice> {
        let identity = &record.identity;
        let (Some(rf_address), Some(product_id)) = (identity.rf_address, identity.product_id)
        else {
            debug!(address = %record.address, "Skipping node without identity");
            return None;
        };

        let model = models.resolve(product_id).ok();
        let family = model.map(|m| m.family);
        let capabilities = model
            .map(|m| m.effective_capabilities(record.reported_capabilities()))
            .unwrap_or_default();
        let entities = match family {
            Some(family) => entity_table(family)
                .into_iter()
                .filter(|e| e.requires.is_none_or(|c| capabilities.contains(c)))
                .collect(),
            None => {
                debug!(address = %record.address, product_id = %product_id, "Unsupported product, no entities");
                Vec::new()
            }
        };

        let model_name = family
            .map(|f| f.key().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let info = DeviceInfo {
            identifier: rf_address.to_string(),
            name: identity
                .product_name
                .clone()
                .unwrap_or_else(|| format!("{} {}", model_name, rf_address)),
            manufacturer: MANUFACTURER.to_string(),
            model: model_name,
            model_id: product_id.to_string(),
            serial_number: rf_address.to_string(),
            sw_version: identity.sw_version.map(|v| format!("0x{:04X}", v)),
            via_device: bridge_rf
                .filter(|rf| *rf != rf_address)
                .map(|rf| rf.to_string()),
        };

        Some(ProjectedDevice {
            address: record.address,
            rf_address,
            info,
            family,
            capabilities,
            entities,
        })
    }

    /// Current state of every entity of one device.
    pub fn states(
        &self,
        device: &ProjectedDevice,
        record: &NodeRecord,
        fetched_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<EntityState> {
        let since_fetch = fetched_at
            .and_then(|t| (now - t).to_std().ok())
            .unwrap_or_default();
        let identifier = device.identifier();

        device
            .entities
            .iter()
            .map(|entity| {
                let reading = entity.field.and_then(|f| record.get(f));
                self.entity_state(&identifier, device, entity, reading, since_fetch)
            })
            .collect()
    }

    fn entity_state(
        &self,
        identifier: &str,
        device: &ProjectedDevice,
        entity: &EntityDescription,
        reading: Option<&Reading>,
        since_fetch: Duration,
    ) -> EntityState {
        if entity.platform == Platform::Button {
            let mut state =
                EntityState::new(identifier, entity.platform, entity.key, StateValue::Null);
            state.available = true;
            return state;
        }

        let value = match (entity.field, reading) {
            (Some(field), Some(reading)) if !self.is_stale(reading, since_fetch) => {
                project_value(field, &reading.value)
            }
            _ => StateValue::Null,
        };
        let mut state = EntityState::new(identifier, entity.platform, entity.key, value);

        if let Some(unit) = entity.unit {
            state = state.with_attribute("unit", json!(unit));
        }
        if let Some(range) = entity.range {
            state = state
                .with_attribute("min", json!(range.min))
                .with_attribute("max", json!(range.max))
                .with_attribute("step", json!(range.step));
        }
        if !entity.options.is_empty() {
            state = state.with_attribute("options", json!(entity.options));
        }
        if entity.platform == Platform::Fan {
            let is_on = state.available && state.value != StateValue::from("off");
            state = state
                .with_attribute("preset_modes", json!(fan_preset_modes(device.capabilities)))
                .with_attribute("is_on", json!(is_on));
        }
        if let Some(status) = reading.and_then(|r| r.status) {
            state = state
                .with_attribute("age_seconds", json!(status.age.as_secs()))
                .with_attribute("source", json!(status.source))
                .with_attribute("flags", json!(status.flags));
        }
        state
    }

    fn is_stale(&self, reading: &Reading, since_fetch: Duration) -> bool {
        let Some(limit) = self.stale_after else {
            return false;
        };
        let age = reading.status.map(|s| s.age).unwrap_or_default() + since_fetch;
        age > limit
    }

    /// Devices and their states for a whole snapshot.
    pub fn project(
        &self,
        snapshot: &NodeSnapshotStore,
        models: &ModelDirectory,
        now: DateTime<Utc>,
    ) -> Vec<(ProjectedDevice, Vec<EntityState>)> {
        self.devices(snapshot, models)
            .into_iter()
            .filter_map(|device| {
                let record = snapshot.get(device.address)?;
                let states = self.states(&device, record, snapshot.fetched_at(), now);
                Some((device, states))
            })
            .collect()
    }
}

/// Translate an entity write into a node command.
pub fn command_for(
    device: &ProjectedDevice,
    platform: Platform,
    key: &str,
    payload: &StateValue,
) -> Result<NodeCommand, EntityCommandError> {
    let entity = device
        .entity(platform, key)
        .ok_or_else(|| EntityCommandError::UnknownEntity {
            platform,
            key: key.to_string(),
        })?;
    let invalid = |reason: &str| EntityCommandError::InvalidPayload {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    match (entity.platform, entity.field) {
        (Platform::Fan, _) => {
            let StateValue::Text(preset) = payload else {
                return Err(invalid("expected a preset name"));
            };
            if !fan_preset_modes(device.capabilities).contains(&preset.as_str()) {
                return Err(EntityCommandError::PresetNotSupported(preset.clone()));
            }
            preset_command(preset).ok_or_else(|| EntityCommandError::PresetNotSupported(preset.clone()))
        }
        (Platform::Select, Some(Field::BypassMode)) => {
            let StateValue::Text(option) = payload else {
                return Err(invalid("expected an option"));
            };
            if !entity.options.contains(&option.as_str()) {
                return Err(invalid("unknown option"));
            }
            let mode = BypassMode::from_option(option).ok_or_else(|| invalid("unknown option"))?;
            Ok(NodeCommand::SetBypassMode { mode })
        }
        (Platform::Number, Some(field)) => {
            let value = payload.as_f64().ok_or_else(|| invalid("expected a number"))?;
            if let Some(range) = entity.range {
                if !(range.min..=range.max).contains(&value) {
                    return Err(invalid(&format!(
                        "{} outside {}..={}",
                        value, range.min, range.max
                    )));
                }
            }
            match field {
                Field::PreheaterSetpoint => Ok(NodeCommand::SetPreheaterSetpoint { celsius: value }),
                Field::FrostProtectionPreheaterSetpoint => {
                    Ok(NodeCommand::SetFrostProtectionPreheaterSetpoint { celsius: value })
                }
                Field::FreeVentilationSetpoint => {
                    Ok(NodeCommand::SetFreeVentilationSetpoint { celsius: value })
                }
                Field::FreeVentilationCoolingOffset => {
                    Ok(NodeCommand::SetFreeVentilationCoolingOffset { kelvin: value })
                }
                _ => Err(EntityCommandError::ReadOnly {
                    key: key.to_string(),
                }),
            }
        }
        (Platform::Switch, Some(Field::BasicVentilationEnable)) => {
            let StateValue::Bool(enabled) = payload else {
                return Err(invalid("expected true or false"));
            };
            Ok(NodeCommand::SetBasicVentilation { enabled: *enabled })
        }
        (Platform::Button, None) if entity.key == FILTER_RESET.key => Ok(NodeCommand::FilterReset),
        _ => Err(EntityCommandError::ReadOnly {
            key: key.to_string(),
        }),
    }
}
