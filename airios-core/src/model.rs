//! Model Directory: product identifier to model descriptor.
//!
//! The set of families is closed. Product identifiers come from the
//! driver's registry at startup and the directory is immutable afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::address::ProductId;
use crate::command::CommandKind;
use crate::field::Field;

/// Optional features a controller may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Off,
    Boost,
    Auto,
    Away,
    TimerOverride,
    Preheater,
    BypassControl,
    BasicVentilation,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Off,
        Capability::Boost,
        Capability::Auto,
        Capability::Away,
        Capability::TimerOverride,
        Capability::Preheater,
        Capability::BypassControl,
        Capability::BasicVentilation,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Small set of [`Capability`] flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(capabilities: &[Capability]) -> Self {
        capabilities.iter().copied().collect()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn intersection(&self, other: CapabilitySet) -> CapabilitySet {
        Self(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::empty();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(capabilities: Vec<Capability>) -> Self {
        capabilities.into_iter().collect()
    }
}

impl From<CapabilitySet> for Vec<Capability> {
    fn from(set: CapabilitySet) -> Self {
        set.iter().collect()
    }
}

/// What a node is on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Bridge,
    Controller,
    Accessory,
}

/// Supported product families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    #[serde(rename = "BRDG-02R13")]
    Brdg02R13,
    #[serde(rename = "VMD-02RPS78")]
    Vmd02Rps78,
    #[serde(rename = "VMD-07RPS13")]
    Vmd07Rps13,
    #[serde(rename = "VMN-05LM02")]
    Vmn05Lm02,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::Brdg02R13,
        ModelFamily::Vmd02Rps78,
        ModelFamily::Vmd07Rps13,
        ModelFamily::Vmn05Lm02,
    ];

    /// Model key as used by the driver registry.
    pub fn key(&self) -> &'static str {
        match self {
            ModelFamily::Brdg02R13 => "BRDG-02R13",
            ModelFamily::Vmd02Rps78 => "VMD-02RPS78",
            ModelFamily::Vmd07Rps13 => "VMD-07RPS13",
            ModelFamily::Vmn05Lm02 => "VMN-05LM02",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn role(&self) -> NodeRole {
        match self {
            ModelFamily::Brdg02R13 => NodeRole::Bridge,
            ModelFamily::Vmd02Rps78 | ModelFamily::Vmd07Rps13 => NodeRole::Controller,
            ModelFamily::Vmn05Lm02 => NodeRole::Accessory,
        }
    }

    /// Resolve a product display name offered by the bind flow.
    pub fn from_display_name(name: &str) -> Option<Self> {
        PRODUCT_NAMES
            .iter()
            .find(|(display, _)| *display == name)
            .map(|(_, family)| *family)
    }

    /// Display names that can be bound with the given role.
    pub fn display_names(role: NodeRole) -> impl Iterator<Item = &'static str> {
        PRODUCT_NAMES
            .iter()
            .filter(move |(_, family)| family.role() == role)
            .map(|(display, _)| *display)
    }

    fn capability_ceiling(&self) -> CapabilitySet {
        use Capability::*;
        match self {
            ModelFamily::Brdg02R13 | ModelFamily::Vmn05Lm02 => CapabilitySet::empty(),
            ModelFamily::Vmd02Rps78 => CapabilitySet::of(&[
                Off,
                Boost,
                Auto,
                Away,
                TimerOverride,
                Preheater,
                BypassControl,
            ]),
            ModelFamily::Vmd07Rps13 => {
                CapabilitySet::of(&[Off, Boost, Auto, Away, TimerOverride, BasicVentilation])
            }
        }
    }

    fn commands(&self) -> &'static [CommandKind] {
        use CommandKind::*;
        match self {
            ModelFamily::Brdg02R13 => &[Reset],
            ModelFamily::Vmd02Rps78 => &[
                SetVentilationSpeed,
                SetVentilationSpeedOverride,
                SetPresetFanSpeeds,
                SetBypassMode,
                FilterReset,
                SetPreheaterSetpoint,
                SetFrostProtectionPreheaterSetpoint,
                SetFreeVentilationSetpoint,
                SetFreeVentilationCoolingOffset,
            ],
            ModelFamily::Vmd07Rps13 => &[
                SetVentilationSpeed,
                SetVentilationSpeedOverride,
                SetBasicVentilation,
                FilterReset,
                SetFreeVentilationSetpoint,
                SetFreeVentilationCoolingOffset,
            ],
            ModelFamily::Vmn05Lm02 => &[],
        }
    }

    fn fields(&self) -> &'static [Field] {
        use Field::*;
        match self {
            ModelFamily::Brdg02R13 => &[
                RfLoadLastHour,
                RfLoadCurrentHour,
                RfSentMessagesLastHour,
                RfSentMessagesCurrentHour,
                PowerOnTime,
                FaultStatus,
                RfCommStatus,
            ],
            ModelFamily::Vmd02Rps78 => &[
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
                FilterRemainingPercent,
                FilterDirty,
                Defrost,
                BypassPosition,
                BypassMode,
                Postheater,
                OverrideRemainingTime,
                PreheaterSetpoint,
                FrostProtectionPreheaterSetpoint,
                FreeVentilationSetpoint,
                FreeVentilationCoolingOffset,
                FaultStatus,
                RfCommStatus,
                Capabilities,
            ],
            ModelFamily::Vmd07Rps13 => &[
                VentilationSpeed,
                IndoorAirTemperature,
                ExhaustAirTemperature,
                SupplyAirTemperature,
                SupplyFanSpeed,
                ExhaustFanSpeed,
                ErrorCode,
                FilterRemainingDays,
                FilterRemainingPercent,
                FilterDirty,
                BypassPosition,
                BasicVentilationEnable,
                Co2Level,
                Co2ControlSetpoint,
                FreeVentilationSetpoint,
                FreeVentilationCoolingOffset,
                FaultStatus,
                RfCommStatus,
                Capabilities,
            ],
            ModelFamily::Vmn05Lm02 => &[BatteryStatus, FaultStatus, RfCommStatus],
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

const PRODUCT_NAMES: &[(&str, ModelFamily)] = &[
    ("Siber DF Optima 2", ModelFamily::Vmd02Rps78),
    ("Siber DF EVO", ModelFamily::Vmd02Rps78),
    ("ClimaRad Ventura V1", ModelFamily::Vmd07Rps13),
    ("Siber 4 button remote", ModelFamily::Vmn05Lm02),
];

/// Static description of one product family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub family: ModelFamily,
    pub product_id: ProductId,
    pub role: NodeRole,
    pub capabilities: CapabilitySet,
    pub commands: &'static [CommandKind],
    pub fields: &'static [Field],
}

impl ModelDescriptor {
    pub fn new(family: ModelFamily, product_id: ProductId) -> Self {
        Self {
            family,
            product_id,
            role: family.role(),
            capabilities: family.capability_ceiling(),
            commands: family.commands(),
            fields: family.fields(),
        }
    }

    pub fn supports(&self, kind: CommandKind) -> bool {
        self.commands.contains(&kind)
    }

    pub fn reports(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    /// Capabilities actually usable on a node.
    ///
    /// The node's own capability register narrows the family ceiling. A
    /// node that does not report one is limited to switching off.
    pub fn effective_capabilities(&self, reported: Option<CapabilitySet>) -> CapabilitySet {
        let reported = reported.unwrap_or_else(|| CapabilitySet::of(&[Capability::Off]));
        self.capabilities.intersection(reported)
    }
}

/// Model lookup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("No model for product {0}")]
    NotFound(ProductId),

    #[error("Model family {0} is not known to the bridge driver")]
    FamilyNotLoaded(ModelFamily),
}

/// Read-only product directory, built once from the driver registry.
#[derive(Debug, Clone, Default)]
pub struct ModelDirectory {
    by_product: BTreeMap<ProductId, ModelDescriptor>,
}

impl ModelDirectory {
    /// Build from the driver's `model key -> product id` registry.
    pub fn from_registry(registry: &BTreeMap<String, ProductId>) -> Self {
        let mut by_product = BTreeMap::new();
        for (key, product_id) in registry {
            match ModelFamily::from_key(key) {
                Some(family) => {
                    debug!(model = %family, product_id = %product_id, "Registered model");
                    by_product.insert(*product_id, ModelDescriptor::new(family, *product_id));
                }
                None => warn!(model = %key, product_id = %product_id, "Skipping unknown model"),
            }
        }
        Self { by_product }
    }

    pub fn resolve(&self, product_id: ProductId) -> Result<&ModelDescriptor, ModelError> {
        self.by_product
            .get(&product_id)
            .ok_or(ModelError::NotFound(product_id))
    }

    /// Descriptor for a family, if the driver registered it.
    pub fn family(&self, family: ModelFamily) -> Result<&ModelDescriptor, ModelError> {
        self.by_product
            .values()
            .find(|d| d.family == family)
            .ok_or(ModelError::FamilyNotLoaded(family))
    }

    pub fn len(&self) -> usize {
        self.by_product.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_product.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BTreeMap<String, ProductId> {
        BTreeMap::from([
            ("BRDG-02R13".to_string(), ProductId(0x0001C849)),
            ("VMD-02RPS78".to_string(), ProductId(0x0001C892)),
            ("VMD-07RPS13".to_string(), ProductId(0x0001C883)),
            ("VMN-05LM02".to_string(), ProductId(0x0001C852)),
            ("XYZ-99".to_string(), ProductId(0x00000099)),
        ])
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let dir = ModelDirectory::from_registry(&registry());
        assert_eq!(dir.len(), 4);

        let bridge = dir.resolve(ProductId(0x0001C849)).unwrap();
        assert_eq!(bridge.family, ModelFamily::Brdg02R13);
        assert_eq!(bridge.role, NodeRole::Bridge);

        assert_eq!(
            dir.resolve(ProductId(0x00000099)),
            Err(ModelError::NotFound(ProductId(0x00000099)))
        );
    }

    #[test]
    fn test_command_tables() {
        let dir = ModelDirectory::from_registry(&registry());
        let vmd02 = dir.family(ModelFamily::Vmd02Rps78).unwrap();
        assert!(vmd02.supports(CommandKind::SetBypassMode));
        assert!(!vmd02.supports(CommandKind::SetBasicVentilation));

        let vmd07 = dir.family(ModelFamily::Vmd07Rps13).unwrap();
        assert!(vmd07.supports(CommandKind::SetBasicVentilation));
        assert!(!vmd07.supports(CommandKind::SetBypassMode));

        let remote = dir.family(ModelFamily::Vmn05Lm02).unwrap();
        assert!(remote.commands.is_empty());
    }

    #[test]
    fn test_reported_capabilities_narrow_ceiling() {
        let desc = ModelDescriptor::new(ModelFamily::Vmd07Rps13, ProductId(1));
        let reported = CapabilitySet::of(&[Capability::Boost, Capability::Preheater]);
        let effective = desc.effective_capabilities(Some(reported));
        assert!(effective.contains(Capability::Boost));
        // VMD-07 has no preheater even if the register claims one
        assert!(!effective.contains(Capability::Preheater));

        let fallback = desc.effective_capabilities(None);
        assert_eq!(fallback, CapabilitySet::of(&[Capability::Off]));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(
            ModelFamily::from_display_name("Siber DF EVO"),
            Some(ModelFamily::Vmd02Rps78)
        );
        assert_eq!(ModelFamily::from_display_name("Unknown"), None);
        let remotes: Vec<_> = ModelFamily::display_names(NodeRole::Accessory).collect();
        assert_eq!(remotes, vec!["Siber 4 button remote"]);
    }

    #[test]
    fn test_capability_set_serde() {
        let set = CapabilitySet::of(&[Capability::Off, Capability::Boost]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["off","boost"]"#);
        let back: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
