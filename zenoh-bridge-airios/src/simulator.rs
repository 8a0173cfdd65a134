//! Simulated Airios bridge.
//!
//! An in-memory [`BridgeClient`] with a bridge, a configurable set of bound
//! nodes and a bind handshake that completes after a few status polls.
//! Values drift slowly between polls so published states visibly change.

use std::collections::BTreeMap;
use std::time::Duration;

use airios_core::binding::BindRole;
use airios_core::command::RequestedSpeed;
use airios_core::field::{
    BypassMode, ErrorCode, HeaterStatus, ResultStatus, SensorStatus, VentilationSpeed,
};
use airios_core::model::{Capability, CapabilitySet, ModelDescriptor, ModelFamily, NodeRole};
use airios_core::{
    BindingStatus, BridgeClient, ClientError, Field, FieldValue, NodeAddress, NodeCommand,
    NodeIdentity, NodeRecord, ProductId, Reading, RfAddress,
};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::SimulatedNode;

/// Product identifier the simulator reports for a family.
pub fn product_id(family: ModelFamily) -> ProductId {
    match family {
        ModelFamily::Brdg02R13 => ProductId(0x0001C849),
        ModelFamily::Vmd02Rps78 => ProductId(0x0001C892),
        ModelFamily::Vmd07Rps13 => ProductId(0x0001C883),
        ModelFamily::Vmn05Lm02 => ProductId(0x0001C852),
    }
}

fn family_of(product: ProductId) -> Option<ModelFamily> {
    ModelFamily::ALL
        .into_iter()
        .find(|f| product_id(*f) == product)
}

#[derive(Debug, Clone)]
struct SimNode {
    family: ModelFamily,
    rf_address: RfAddress,
    speed: VentilationSpeed,
    override_minutes: u16,
    bypass: BypassMode,
    basic_ventilation: bool,
    preheater_setpoint: f64,
    frost_protection_setpoint: f64,
    free_ventilation_setpoint: f64,
    cooling_offset: f64,
    filter_used_days: i64,
}

impl SimNode {
    fn new(family: ModelFamily, rf_address: RfAddress) -> Self {
        Self {
            family,
            rf_address,
            speed: VentilationSpeed::Mid,
            override_minutes: 0,
            bypass: BypassMode::Auto,
            basic_ventilation: false,
            preheater_setpoint: -5.0,
            frost_protection_setpoint: -10.0,
            free_ventilation_setpoint: 22.0,
            cooling_offset: 3.0,
            filter_used_days: 20,
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        use Capability::*;
        match self.family {
            ModelFamily::Vmd02Rps78 => {
                CapabilitySet::of(&[Off, Boost, Auto, Away, TimerOverride, Preheater, BypassControl])
            }
            ModelFamily::Vmd07Rps13 => {
                CapabilitySet::of(&[Off, Auto, Away, TimerOverride, BasicVentilation])
            }
            _ => CapabilitySet::empty(),
        }
    }

    fn fan_percent(&self) -> i64 {
        match self.speed {
            VentilationSpeed::Off => 0,
            VentilationSpeed::Away => 15,
            VentilationSpeed::Low | VentilationSpeed::OverrideLow => 30,
            VentilationSpeed::Mid | VentilationSpeed::OverrideMid | VentilationSpeed::Auto => 50,
            VentilationSpeed::High | VentilationSpeed::OverrideHigh => 75,
            VentilationSpeed::Boost => 100,
        }
    }

    fn apply(&mut self, command: &NodeCommand) {
        match command {
            NodeCommand::SetVentilationSpeed { speed } => {
                self.speed = speed_of(*speed);
                self.override_minutes = 0;
            }
            NodeCommand::SetVentilationSpeedOverride { speed, minutes } => {
                self.speed = match speed {
                    RequestedSpeed::Low => VentilationSpeed::OverrideLow,
                    RequestedSpeed::Mid => VentilationSpeed::OverrideMid,
                    RequestedSpeed::High => VentilationSpeed::OverrideHigh,
                    other => speed_of(*other),
                };
                self.override_minutes = *minutes;
            }
            NodeCommand::SetPresetFanSpeeds {
                preset,
                supply,
                exhaust,
            } => {
                debug!(rf_address = %self.rf_address, ?preset, supply, exhaust, "Simulated preset fan speeds accepted");
            }
            NodeCommand::SetBasicVentilation { enabled } => self.basic_ventilation = *enabled,
            NodeCommand::SetBypassMode { mode } => self.bypass = *mode,
            NodeCommand::FilterReset => self.filter_used_days = 0,
            NodeCommand::SetPreheaterSetpoint { celsius } => self.preheater_setpoint = *celsius,
            NodeCommand::SetFrostProtectionPreheaterSetpoint { celsius } => {
                self.frost_protection_setpoint = *celsius
            }
            NodeCommand::SetFreeVentilationSetpoint { celsius } => {
                self.free_ventilation_setpoint = *celsius
            }
            NodeCommand::SetFreeVentilationCoolingOffset { kelvin } => {
                self.cooling_offset = *kelvin
            }
            NodeCommand::Reset { .. } => {
                *self = SimNode::new(self.family, self.rf_address);
            }
        }
    }

    /// Advance one poll cycle.
    fn tick(&mut self) {
        if self.override_minutes > 0 {
            self.override_minutes -= 1;
            if self.override_minutes == 0 {
                self.speed = VentilationSpeed::Mid;
            }
        }
    }

    fn record(&self, address: NodeAddress, tick: u64) -> NodeRecord {
        let wave = (tick as f64 / 8.0).sin();
        let status = ResultStatus {
            age: Duration::from_secs(tick % 45),
            source: 0,
            flags: 0,
        };
        let read = |value| Reading::new(value).with_status(status);
        let temperature = |base: f64| {
            read(FieldValue::Temperature {
                celsius: ((base + wave) * 10.0).round() / 10.0,
                status: SensorStatus::Ok,
            })
        };
        let percent = self.fan_percent();
        let filter_remaining = (180 - self.filter_used_days).max(0);

        let mut record = NodeRecord::new(address, identity(self.family, self.rf_address))
            .with_field(
                Field::FaultStatus,
                read(FieldValue::Fault {
                    available: true,
                    fault: false,
                }),
            )
            .with_field(Field::RfCommStatus, read(FieldValue::Integer(0)));

        let family_fields: Vec<(Field, Reading)> = match self.family {
            ModelFamily::Vmd02Rps78 => vec![
                (Field::VentilationSpeed, read(FieldValue::Speed(self.speed))),
                (Field::IndoorAirTemperature, temperature(21.0)),
                (Field::OutdoorAirTemperature, temperature(8.0)),
                (Field::ExhaustAirTemperature, temperature(10.5)),
                (Field::SupplyAirTemperature, temperature(18.5)),
                (Field::ExhaustFanRpm, read(FieldValue::Integer(percent * 30))),
                (Field::SupplyFanRpm, read(FieldValue::Integer(percent * 31))),
                (Field::SupplyFanSpeed, read(FieldValue::Integer(percent))),
                (Field::ExhaustFanSpeed, read(FieldValue::Integer(percent))),
                (Field::ErrorCode, read(FieldValue::ErrorCode(ErrorCode::NoError))),
                (Field::FilterDurationDays, read(FieldValue::Integer(180))),
                (
                    Field::FilterRemainingPercent,
                    read(FieldValue::Integer(filter_remaining * 100 / 180)),
                ),
                (Field::FilterDirty, read(FieldValue::Bool(filter_remaining == 0))),
                (Field::Defrost, read(FieldValue::Bool(false))),
                (
                    Field::BypassPosition,
                    read(FieldValue::BypassPosition {
                        position: if self.bypass == BypassMode::Open { 100 } else { 0 },
                        error: false,
                    }),
                ),
                (Field::BypassMode, read(FieldValue::BypassMode(self.bypass))),
                (
                    Field::Postheater,
                    read(FieldValue::Heater {
                        level: 0,
                        status: HeaterStatus::Ok,
                    }),
                ),
                (
                    Field::OverrideRemainingTime,
                    read(FieldValue::Integer(i64::from(self.override_minutes))),
                ),
                (
                    Field::PreheaterSetpoint,
                    read(FieldValue::Float(self.preheater_setpoint)),
                ),
                (
                    Field::FrostProtectionPreheaterSetpoint,
                    read(FieldValue::Float(self.frost_protection_setpoint)),
                ),
                (
                    Field::FreeVentilationSetpoint,
                    read(FieldValue::Float(self.free_ventilation_setpoint)),
                ),
                (
                    Field::FreeVentilationCoolingOffset,
                    read(FieldValue::Float(self.cooling_offset)),
                ),
                (
                    Field::Capabilities,
                    Reading::new(FieldValue::Capabilities(self.capabilities())),
                ),
            ],
            ModelFamily::Vmd07Rps13 => vec![
                (Field::VentilationSpeed, read(FieldValue::Speed(self.speed))),
                (Field::IndoorAirTemperature, temperature(21.5)),
                (Field::ExhaustAirTemperature, temperature(11.0)),
                (Field::SupplyAirTemperature, temperature(19.0)),
                (Field::SupplyFanSpeed, read(FieldValue::Integer(percent))),
                (Field::ExhaustFanSpeed, read(FieldValue::Integer(percent))),
                (Field::ErrorCode, read(FieldValue::ErrorCode(ErrorCode::NoError))),
                (Field::FilterRemainingDays, read(FieldValue::Integer(filter_remaining))),
                (
                    Field::FilterRemainingPercent,
                    read(FieldValue::Integer(filter_remaining * 100 / 180)),
                ),
                (Field::FilterDirty, read(FieldValue::Bool(filter_remaining == 0))),
                (
                    Field::BypassPosition,
                    read(FieldValue::BypassPosition {
                        position: 0,
                        error: false,
                    }),
                ),
                (
                    Field::BasicVentilationEnable,
                    read(FieldValue::Bool(self.basic_ventilation)),
                ),
                (
                    Field::Co2Level,
                    read(FieldValue::Integer(650 + (wave * 120.0) as i64)),
                ),
                (Field::Co2ControlSetpoint, read(FieldValue::Integer(800))),
                (
                    Field::FreeVentilationSetpoint,
                    read(FieldValue::Float(self.free_ventilation_setpoint)),
                ),
                (
                    Field::FreeVentilationCoolingOffset,
                    read(FieldValue::Float(self.cooling_offset)),
                ),
                (
                    Field::Capabilities,
                    Reading::new(FieldValue::Capabilities(self.capabilities())),
                ),
            ],
            ModelFamily::Vmn05Lm02 => vec![(
                Field::BatteryStatus,
                read(FieldValue::Battery {
                    available: true,
                    low: false,
                }),
            )],
            ModelFamily::Brdg02R13 => Vec::new(),
        };
        for (field, reading) in family_fields {
            record = record.with_field(field, reading);
        }
        record
    }
}

fn speed_of(speed: RequestedSpeed) -> VentilationSpeed {
    match speed {
        RequestedSpeed::Off => VentilationSpeed::Off,
        RequestedSpeed::Low => VentilationSpeed::Low,
        RequestedSpeed::Mid => VentilationSpeed::Mid,
        RequestedSpeed::High => VentilationSpeed::High,
        RequestedSpeed::Away => VentilationSpeed::Away,
        RequestedSpeed::Boost => VentilationSpeed::Boost,
        RequestedSpeed::Auto => VentilationSpeed::Auto,
    }
}

fn identity(family: ModelFamily, rf_address: RfAddress) -> NodeIdentity {
    NodeIdentity {
        rf_address: Some(rf_address),
        product_id: Some(product_id(family)),
        product_name: Some(family.key().to_string()),
        sw_version: Some(0x0204),
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingBind {
    role: BindRole,
    address: NodeAddress,
    family: ModelFamily,
    rf_address: Option<RfAddress>,
    remaining: u32,
}

/// In-memory bridge driver.
#[derive(Debug)]
pub struct SimulatedBridge {
    bus_address: NodeAddress,
    bridge_rf: RfAddress,
    nodes: BTreeMap<NodeAddress, SimNode>,
    pending: Option<PendingBind>,
    status: BindingStatus,
    bind_polls: u32,
    next_rf: u32,
    tick: u64,
    sent_messages: i64,
}

impl SimulatedBridge {
    pub fn new(bus_address: NodeAddress, nodes: &[SimulatedNode], bind_polls: u32) -> Self {
        let nodes = nodes
            .iter()
            .map(|n| (n.address, SimNode::new(n.model, RfAddress(n.rf_address))))
            .collect();
        Self {
            bus_address,
            bridge_rf: RfAddress(0x00B1D6E0),
            nodes,
            pending: None,
            status: BindingStatus::NotAvailable,
            bind_polls,
            next_rf: 0x00C0_0001,
            tick: 0,
            sent_messages: 0,
        }
    }

    fn bridge_record(&self) -> NodeRecord {
        let load = 2 + (self.nodes.len() as i64) * 3;
        NodeRecord::new(self.bus_address, identity(ModelFamily::Brdg02R13, self.bridge_rf))
            .with_field(Field::RfLoadLastHour, Reading::new(FieldValue::Integer(load)))
            .with_field(
                Field::RfLoadCurrentHour,
                Reading::new(FieldValue::Integer(load + (self.tick % 3) as i64)),
            )
            .with_field(
                Field::RfSentMessagesLastHour,
                Reading::new(FieldValue::Integer(120)),
            )
            .with_field(
                Field::RfSentMessagesCurrentHour,
                Reading::new(FieldValue::Integer(self.sent_messages)),
            )
            .with_field(
                Field::PowerOnTime,
                Reading::new(FieldValue::Duration(Duration::from_secs(
                    86_400 + self.tick * 30,
                ))),
            )
            .with_field(
                Field::FaultStatus,
                Reading::new(FieldValue::Fault {
                    available: true,
                    fault: false,
                }),
            )
            .with_field(Field::RfCommStatus, Reading::new(FieldValue::Integer(0)))
    }

    fn start_bind(
        &mut self,
        role: BindRole,
        address: NodeAddress,
        product: ProductId,
        rf_address: Option<RfAddress>,
    ) -> bool {
        let expected = match role {
            BindRole::Controller => NodeRole::Controller,
            BindRole::Accessory => NodeRole::Accessory,
        };
        let Some(family) = family_of(product).filter(|f| f.role() == expected) else {
            debug!(product = %product, "Simulated bind refused: product");
            return false;
        };
        if self.nodes.contains_key(&address) || address == self.bus_address || self.pending.is_some() {
            debug!(address = %address, "Simulated bind refused: slot busy");
            return false;
        }
        self.pending = Some(PendingBind {
            role,
            address,
            family,
            rf_address,
            remaining: self.bind_polls,
        });
        self.status = match role {
            BindRole::Controller => BindingStatus::OutgoingBindingInitialized,
            BindRole::Accessory => BindingStatus::IncomingBindingActive,
        };
        true
    }
}

#[async_trait]
impl BridgeClient for SimulatedBridge {
    async fn model_registry(&mut self) -> Result<BTreeMap<String, ProductId>, ClientError> {
        Ok(ModelFamily::ALL
            .into_iter()
            .map(|f| (f.key().to_string(), product_id(f)))
            .collect())
    }

    async fn read_node_identity(
        &mut self,
        node: NodeAddress,
    ) -> Result<NodeIdentity, ClientError> {
        if node == self.bus_address {
            return Ok(identity(ModelFamily::Brdg02R13, self.bridge_rf));
        }
        Ok(self
            .nodes
            .get(&node)
            .map(|n| identity(n.family, n.rf_address))
            .unwrap_or_default())
    }

    async fn fetch_all(&mut self) -> Result<Vec<NodeRecord>, ClientError> {
        self.tick += 1;
        self.sent_messages += 4;
        let tick = self.tick;
        let mut records = vec![self.bridge_record()];
        for (address, node) in self.nodes.iter_mut() {
            node.tick();
            records.push(node.record(*address, tick));
        }
        Ok(records)
    }

    async fn list_bound_nodes(&mut self) -> Result<Vec<NodeAddress>, ClientError> {
        Ok(self.nodes.keys().copied().collect())
    }

    async fn send_bind_controller(
        &mut self,
        node: NodeAddress,
        product: ProductId,
        rf_address: Option<RfAddress>,
    ) -> Result<bool, ClientError> {
        Ok(self.start_bind(BindRole::Controller, node, product, rf_address))
    }

    async fn send_bind_accessory(
        &mut self,
        controller: NodeAddress,
        node: NodeAddress,
        product: ProductId,
    ) -> Result<bool, ClientError> {
        let controller_bound = self
            .nodes
            .get(&controller)
            .is_some_and(|n| n.family.role() == NodeRole::Controller);
        if !controller_bound {
            debug!(controller = %controller, "Simulated bind refused: no controller");
            return Ok(false);
        }
        Ok(self.start_bind(BindRole::Accessory, node, product, None))
    }

    async fn query_bind_status(&mut self) -> Result<BindingStatus, ClientError> {
        let Some(mut pending) = self.pending else {
            return Ok(self.status);
        };
        if pending.remaining > 0 {
            pending.remaining -= 1;
            self.pending = Some(pending);
            return Ok(self.status);
        }

        let rf_address = pending.rf_address.unwrap_or_else(|| {
            let rf = RfAddress(self.next_rf);
            self.next_rf += 1;
            rf
        });
        self.nodes
            .insert(pending.address, SimNode::new(pending.family, rf_address));
        self.pending = None;
        self.status = match pending.role {
            BindRole::Controller => BindingStatus::OutgoingBindingCompleted,
            BindRole::Accessory => BindingStatus::IncomingBindingCompleted,
        };
        info!(address = %pending.address, rf_address = %rf_address, model = %pending.family, "Simulated node bound");
        Ok(self.status)
    }

    async fn send_unbind(&mut self, node: NodeAddress) -> Result<bool, ClientError> {
        if self.pending.is_some_and(|p| p.address == node) {
            self.pending = None;
            self.status = BindingStatus::NotAvailable;
        }
        if self.nodes.remove(&node).is_some() {
            info!(address = %node, "Simulated node unbound");
        }
        Ok(true)
    }

    async fn execute(
        &mut self,
        node: NodeAddress,
        command: &NodeCommand,
    ) -> Result<bool, ClientError> {
        let Some(sim) = self.nodes.get_mut(&node) else {
            return Ok(node == self.bus_address && matches!(command, NodeCommand::Reset { .. }));
        };
        let model = ModelDescriptor::new(sim.family, product_id(sim.family));
        if !model.supports(command.kind()) {
            return Ok(false);
        }
        sim.apply(command);
        self.sent_messages += 1;
        Ok(true)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        debug!("Simulated bridge closed");
        Ok(())
    }
}
