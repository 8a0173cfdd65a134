//! Integration tests for zenoh-bridge-airios against the simulated bridge.

use std::time::Duration;

use airios_common::{Format, KeyExprBuilder, Platform, StateValue, decode_auto, encode};
use airios_core::command::RequestedSpeed;
use airios_core::flow::ControllerForm;
use airios_core::model::ModelFamily;
use airios_core::{
    BindFlow, BindRole, BindTiming, BindingOrchestrator, Bus, Coordinator, FlowStep, NodeAddress,
    NodeCommand, Projection, RfAddress, unconfigured_nodes, validate_bridge,
};
use chrono::Utc;
use zenoh_bridge_airios::commands::CommandHandler;
use zenoh_bridge_airios::config::SimulatedNode;
use zenoh_bridge_airios::error::BridgeError;
use zenoh_bridge_airios::simulator::SimulatedBridge;

const CONTROLLER_RF: u32 = 0xA1B2C3;
const REMOTE_RF: u32 = 0xA1B2C4;

fn addr(a: u8) -> NodeAddress {
    NodeAddress::new(a).unwrap()
}

async fn start() -> Coordinator {
    let sim = SimulatedBridge::new(
        addr(207),
        &[
            SimulatedNode {
                address: addr(2),
                model: ModelFamily::Vmd02Rps78,
                rf_address: CONTROLLER_RF,
            },
            SimulatedNode {
                address: addr(3),
                model: ModelFamily::Vmn05Lm02,
                rf_address: REMOTE_RF,
            },
        ],
        2,
    );
    Coordinator::start(Bus::new(Box::new(sim)), Duration::from_secs(30))
        .await
        .expect("Simulated bridge failed to start")
}

fn handler(coordinator: &Coordinator) -> CommandHandler {
    CommandHandler::new(
        coordinator.clone(),
        Projection::default(),
        KeyExprBuilder::new("airios"),
    )
}

#[tokio::test(start_paused = true)]
async fn test_bridge_validates_and_projects() {
    let coordinator = start().await;

    let rf = validate_bridge(coordinator.bus(), coordinator.models(), addr(207))
        .await
        .unwrap();
    assert_ne!(rf, RfAddress(CONTROLLER_RF));

    let snapshot = coordinator.current_snapshot();
    let projected = Projection::default().project(&snapshot, coordinator.models(), Utc::now());
    assert_eq!(projected.len(), 3);

    let (controller, states) = projected
        .iter()
        .find(|(d, _)| d.address == addr(2))
        .unwrap();
    assert_eq!(controller.identifier(), "0xA1B2C3");
    assert_eq!(controller.info.via_device.as_deref(), Some(rf.to_string().as_str()));

    let speed = states
        .iter()
        .find(|s| s.platform == Platform::Fan)
        .unwrap();
    assert!(speed.available);
    assert_eq!(speed.value, StateValue::from("medium"));

    // What the publisher puts on the wire decodes back for subscribers.
    let encoded = encode(speed, Format::Cbor).unwrap();
    let decoded: airios_common::EntityState = decode_auto(&encoded).unwrap();
    assert_eq!(decoded.unique_id, speed.unique_id);

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_entity_command_round_trip() {
    let coordinator = start().await;
    let handler = handler(&coordinator);

    let (address, command) = handler
        .resolve("airios/0xA1B2C3/select/bypass_mode/set", b"open")
        .unwrap();
    assert_eq!(address, addr(2));
    assert_eq!(
        command,
        NodeCommand::SetBypassMode {
            mode: airios_core::field::BypassMode::Open
        }
    );

    handler
        .handle("airios/0xA1B2C3/select/bypass_mode/set", b"open")
        .await
        .unwrap();
    let snapshot = coordinator.refresh().await.unwrap();

    let projected = Projection::default().project(&snapshot, coordinator.models(), Utc::now());
    let (_, states) = projected
        .iter()
        .find(|(d, _)| d.address == addr(2))
        .unwrap();
    let bypass = states.iter().find(|s| s.key == "bypass_mode").unwrap();
    assert_eq!(bypass.value, StateValue::from("open"));

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fan_override_preset() {
    let coordinator = start().await;
    let handler = handler(&coordinator);

    let (_, command) = handler
        .resolve(
            "airios/0xA1B2C3/fan/ventilation_speed/set",
            b"\"high_override\"",
        )
        .unwrap();
    assert_eq!(
        command,
        NodeCommand::SetVentilationSpeedOverride {
            speed: RequestedSpeed::High,
            minutes: 60
        }
    );

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_entity_command_rejections() {
    let coordinator = start().await;
    let handler = handler(&coordinator);

    assert!(matches!(
        handler.resolve("airios/0xA1B2C3/select/bypass_mode", b"open"),
        Err(BridgeError::NotACommand(_))
    ));
    assert!(matches!(
        handler.resolve("airios/0x000001/select/bypass_mode/set", b"open"),
        Err(BridgeError::UnknownDevice(_))
    ));
    assert!(matches!(
        handler.resolve("airios/0xA1B2C3/sensor/indoor_air_temperature/set", b"20"),
        Err(BridgeError::Entity(_))
    ));
    // The remote has no fan.
    assert!(matches!(
        handler.resolve("airios/0xA1B2C4/fan/ventilation_speed/set", b"low"),
        Err(BridgeError::Entity(_))
    ));

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bind_controller_flow() {
    let coordinator = start().await;
    let orchestrator = BindingOrchestrator::new(coordinator.clone(), BindTiming::default());

    let mut flow = BindFlow::controller(
        coordinator.models(),
        ControllerForm {
            name: "Bedroom".to_string(),
            product: "ClimaRad Ventura V1".to_string(),
            rf_address: Some(RfAddress(0xC0FFEE)),
        },
    )
    .unwrap();
    flow.start(&orchestrator).unwrap();

    let FlowStep::Done(record) = flow.wait().await else {
        panic!("Expected the bind to complete");
    };
    assert_eq!(record.role, BindRole::Controller);
    assert_eq!(record.address, addr(4));
    assert_eq!(record.rf_address, RfAddress(0xC0FFEE));

    let snapshot = coordinator.refresh().await.unwrap();
    assert!(snapshot.get(addr(4)).is_some());

    // Only the new node lacks a record once the existing ones are configured.
    let known: Vec<_> = unconfigured_nodes(&snapshot, coordinator.models(), &[])
        .into_iter()
        .filter(|r| r.address != addr(4))
        .collect();
    let pending = unconfigured_nodes(&snapshot, coordinator.models(), &known);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].rf_address, RfAddress(0xC0FFEE));

    coordinator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_node_commands() {
    let coordinator = start().await;
    let handler = handler(&coordinator);

    handler
        .handle(
            "airios/0xA1B2C3/@/command",
            br#"{"command": "set_preset_fan_speeds", "preset": "low", "supply": 30, "exhaust": 35}"#,
        )
        .await
        .unwrap();

    // Remotes cannot be reset.
    let result = handler
        .handle(
            "airios/0xA1B2C4/@/command",
            br#"{"command": "reset", "mode": "soft"}"#,
        )
        .await;
    assert!(matches!(
        result,
        Err(BridgeError::Core(airios_core::CoreError::CommandNotSupported { .. }))
    ));

    assert!(matches!(
        handler.resolve("airios/0xA1B2C3/@/command", b"reset"),
        Err(BridgeError::Payload(_))
    ));

    coordinator.shutdown().await.unwrap();
}
