//! Zenoh bridge for Airios RF ventilation bridges.
//!
//! Polls the nodes bound to an Airios bridge, publishes their entity states
//! to Zenoh and runs the RF bind flow from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use airios_common::KeyExprBuilder;
use airios_core::flow::{AccessoryForm, ControllerForm};
use airios_core::{
    BindFlow, BindingOrchestrator, BridgeClient, Bus, Coordinator, FlowStep, NodeAddress,
    Projection, RfAddress, SessionProgress, unconfigured_nodes, validate_bridge,
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use zenoh_bridge_airios::commands::CommandHandler;
use zenoh_bridge_airios::config::{AiriosBridgeConfig, ConnectionConfig};
use zenoh_bridge_airios::publisher::{StatePublisher, offline_status};
use zenoh_bridge_airios::simulator::SimulatedBridge;

/// Zenoh bridge for Airios RF ventilation bridges.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-airios")]
#[command(about = "Polls an Airios RF bridge and publishes its nodes to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "airios.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge (default)
    Run,
    /// List bound nodes and the ones without a binding record
    Nodes,
    /// Bind a ventilation unit
    BindController {
        #[arg(long)]
        name: String,
        /// Product name, e.g. "Siber DF Optima 2"
        #[arg(long)]
        product: String,
        /// RF address printed on the unit, e.g. 0xA1B2C3
        #[arg(long, value_parser = parse_rf_address)]
        rf_address: Option<RfAddress>,
    },
    /// Bind an accessory to a configured controller
    BindAccessory {
        #[arg(long)]
        name: String,
        /// Bus address of the controller
        #[arg(long, value_parser = parse_node_address)]
        controller: NodeAddress,
        /// Product name, e.g. "Siber 4 button remote"
        #[arg(long)]
        product: String,
    },
    /// Release a node slot on the bridge
    Unbind {
        #[arg(long, value_parser = parse_node_address)]
        address: NodeAddress,
    },
}

fn parse_rf_address(s: &str) -> std::result::Result<RfAddress, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed
        .map(RfAddress)
        .map_err(|e| format!("invalid RF address '{}': {}", s, e))
}

fn parse_node_address(s: &str) -> std::result::Result<NodeAddress, String> {
    s.parse::<u8>()
        .ok()
        .and_then(NodeAddress::new)
        .ok_or_else(|| format!("invalid node address '{}', expected 1-247", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = AiriosBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = config.logging.clone().with_level(args.log_level.as_deref());
    airios_common::init_tracing(&log_config).context("Failed to init tracing")?;

    info!(config = ?args.config, "Loaded configuration");

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Nodes => nodes(config).await,
        Command::BindController {
            name,
            product,
            rf_address,
        } => {
            let form = ControllerForm {
                name,
                product,
                rf_address,
            };
            bind(&config, |bridge| {
                BindFlow::controller(bridge.coordinator.models(), form)
            })
            .await
        }
        Command::BindAccessory {
            name,
            controller,
            product,
        } => {
            let form = AccessoryForm {
                name,
                controller,
                product,
            };
            let records = config.bridge.bindings.clone();
            bind(&config, |bridge| {
                BindFlow::accessory(bridge.coordinator.models(), &records, form)
            })
            .await
        }
        Command::Unbind { address } => unbind(config, address).await,
    }
}

/// Driver for the configured connection.
fn open_client(config: &AiriosBridgeConfig) -> Result<Box<dyn BridgeClient>> {
    let bus_address = config
        .bridge
        .bus_address()
        .ok_or_else(|| anyhow!("Invalid bus address {}", config.bridge.bus_address))?;

    match &config.bridge.connection {
        ConnectionConfig::Simulated { nodes, bind_polls } => {
            info!(nodes = nodes.len(), "Using simulated Airios bridge");
            Ok(Box::new(SimulatedBridge::new(
                bus_address,
                nodes,
                *bind_polls,
            )))
        }
        other => bail!(
            "No driver for '{}' connections is built into this binary",
            other.kind()
        ),
    }
}

/// A started coordinator on a validated bridge.
struct Bridge {
    coordinator: Coordinator,
    rf_address: RfAddress,
}

async fn open_bridge(config: &AiriosBridgeConfig) -> Result<Bridge> {
    let client = open_client(config)?;
    let coordinator = Coordinator::start(Bus::new(client), config.bridge.scan_interval())
        .await
        .context("Failed to initialize the bridge")?;

    let bus_address = config
        .bridge
        .bus_address()
        .ok_or_else(|| anyhow!("Invalid bus address {}", config.bridge.bus_address))?;
    match validate_bridge(coordinator.bus(), coordinator.models(), bus_address).await {
        Ok(rf_address) => {
            info!(rf_address = %rf_address, address = %bus_address, "Bridge validated");
            Ok(Bridge {
                coordinator,
                rf_address,
            })
        }
        Err(e) => {
            if let Err(close) = coordinator.shutdown().await {
                warn!(error = %close, "Failed to close bridge connection");
            }
            Err(e).context("Bridge validation failed")
        }
    }
}

async fn run(config: AiriosBridgeConfig) -> Result<()> {
    info!("Starting zenoh-bridge-airios");

    let bridge = open_bridge(&config).await?;
    let coordinator = bridge.coordinator.clone();

    // Connect to Zenoh
    let session = Arc::new(
        airios_common::connect(&config.zenoh)
            .await
            .context("Failed to connect to Zenoh")?,
    );

    let keys = KeyExprBuilder::new(&config.bridge.key_prefix);
    let projection = Projection::new(config.bridge.stale_after());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let publisher = StatePublisher::new(
        session.clone(),
        keys.clone(),
        config.serialization,
        projection,
    );
    let publisher_task = tokio::spawn(
        publisher
            .clone()
            .run(coordinator.clone(), shutdown_rx.clone()),
    );

    let handler = CommandHandler::new(coordinator.clone(), projection, keys);
    let command_session = session.clone();
    let command_task = tokio::spawn(async move {
        if let Err(e) = handler.run(command_session, shutdown_rx).await {
            error!(error = %e, "Command handler failed");
        }
    });

    info!(
        bridge = %bridge.rf_address,
        nodes = coordinator.current_snapshot().len(),
        scan_interval = ?config.bridge.scan_interval(),
        "Airios bridge running"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    for task in [publisher_task, command_task] {
        if let Err(e) = task.await {
            warn!(error = %e, "Bridge task ended abnormally");
        }
    }

    if let Err(e) = publisher.publish_status(&offline_status()).await {
        warn!(error = %e, "Failed to publish offline status");
    }
    coordinator
        .shutdown()
        .await
        .context("Failed to close bridge connection")?;
    session
        .close()
        .await
        .map_err(|e| anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("Airios bridge stopped");

    Ok(())
}

async fn nodes(config: AiriosBridgeConfig) -> Result<()> {
    let bridge = open_bridge(&config).await?;
    let coordinator = &bridge.coordinator;
    let snapshot = coordinator.current_snapshot();
    let projection = Projection::new(config.bridge.stale_after());

    println!("Bridge {} (snapshot v{})", bridge.rf_address, snapshot.version());
    for device in projection.devices(&snapshot, coordinator.models()) {
        println!(
            "  {:>3}  {}  {:<12} {:<32} {} entities",
            device.address.get(),
            device.identifier(),
            device.info.model,
            device.info.name,
            device.entities.len()
        );
    }

    let pending = unconfigured_nodes(&snapshot, coordinator.models(), &config.bridge.bindings);
    if !pending.is_empty() {
        println!("Bound nodes without a binding record:");
        for record in &pending {
            println!("{}", serde_json::to_string(record)?);
        }
    }

    coordinator
        .shutdown()
        .await
        .context("Failed to close bridge connection")?;
    Ok(())
}

async fn bind<F>(config: &AiriosBridgeConfig, make_flow: F) -> Result<()>
where
    F: FnOnce(&Bridge) -> std::result::Result<BindFlow, airios_core::FlowError>,
{
    let bridge = open_bridge(config).await?;
    let orchestrator = BindingOrchestrator::new(bridge.coordinator.clone(), config.bridge.bind);

    let outcome = run_flow(&bridge, &orchestrator, make_flow).await;

    // An interrupted session still polls the bridge and may have to unbind
    // its address, so the bus stays open until it ends.
    tokio::select! {
        reaped = orchestrator.shutdown() => {
            for (session, progress) in reaped {
                if let SessionProgress::Succeeded(node) = progress {
                    warn!(
                        session,
                        address = %node.address,
                        rf_address = %node.rf_address,
                        "Interrupted session bound a node; add a binding record for it"
                    );
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Forced exit while a bind session was running; its node slot may stay allocated");
        }
    }

    bridge
        .coordinator
        .shutdown()
        .await
        .context("Failed to close bridge connection")?;

    let record = outcome?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn run_flow<F>(
    bridge: &Bridge,
    orchestrator: &BindingOrchestrator,
    make_flow: F,
) -> Result<airios_core::BindingRecord>
where
    F: FnOnce(&Bridge) -> std::result::Result<BindFlow, airios_core::FlowError>,
{
    let mut flow = make_flow(bridge).context("Invalid bind request")?;
    flow.start(orchestrator)
        .context("Failed to start bind session")?;
    info!(name = flow.name(), "Bind started, put the device in pairing mode");

    let step = tokio::select! {
        step = flow.wait() => Some(step),
        _ = tokio::signal::ctrl_c() => None,
    };
    match step {
        Some(FlowStep::Done(record)) => {
            info!(address = %record.address, rf_address = %record.rf_address, "Bind completed");
            Ok(record)
        }
        Some(FlowStep::Abort(reason)) => bail!("Bind aborted: {}", reason),
        Some(FlowStep::Progress) => bail!("Bind session ended without a result"),
        None => {
            warn!("Bind interrupted, waiting for the session to finish (Ctrl-C again to force exit)");
            flow.abandon(orchestrator);
            bail!("Bind interrupted")
        }
    }
}

async fn unbind(config: AiriosBridgeConfig, address: NodeAddress) -> Result<()> {
    let bridge = open_bridge(&config).await?;
    let released = bridge.coordinator.bus().send_unbind(address).await;

    bridge
        .coordinator
        .shutdown()
        .await
        .context("Failed to close bridge connection")?;

    if !released.with_context(|| format!("Failed to unbind node {}", address))? {
        bail!("Bridge refused to unbind node {}", address);
    }
    println!("Node {} unbound", address);
    Ok(())
}
