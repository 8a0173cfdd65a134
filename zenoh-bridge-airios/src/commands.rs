//! Entity commands received on `/set` keys and raw node commands.

use std::sync::Arc;

use airios_common::{Format, KeyExprBuilder, StateValue, decode, decode_auto};
use airios_core::{
    Coordinator, NodeAddress, NodeCommand, ProjectedDevice, Projection, command_for,
};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use zenoh::Session;
use zenoh::sample::{Sample, SampleKind};

use crate::error::{BridgeError, Result};

/// Decode a command payload.
///
/// Accepts JSON, bare text (e.g. `boost`) and CBOR. An empty payload is a
/// button press.
pub fn decode_payload(payload: &[u8]) -> Option<StateValue> {
    if payload.is_empty() {
        return Some(StateValue::Null);
    }
    if let Ok(value) = decode::<StateValue>(payload, Format::Json) {
        return Some(value);
    }
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(char::is_control) => Some(StateValue::from(text.trim())),
        _ => decode(payload, Format::Cbor).ok(),
    }
}

/// Routes entity writes to node commands through the coordinator.
#[derive(Clone)]
pub struct CommandHandler {
    coordinator: Coordinator,
    projection: Projection,
    keys: KeyExprBuilder,
}

impl CommandHandler {
    pub fn new(coordinator: Coordinator, projection: Projection, keys: KeyExprBuilder) -> Self {
        Self {
            coordinator,
            projection,
            keys,
        }
    }

    fn find_device(&self, identifier: &str) -> Result<ProjectedDevice> {
        let snapshot = self.coordinator.current_snapshot();
        self.projection
            .devices(&snapshot, self.coordinator.models())
            .into_iter()
            .find(|d| d.identifier() == identifier)
            .ok_or_else(|| BridgeError::UnknownDevice(identifier.to_string()))
    }

    /// Translate a command key and payload against the current snapshot.
    ///
    /// Node command keys carry a tagged [`NodeCommand`] in JSON or CBOR,
    /// e.g. `{"command": "reset", "mode": "soft"}`.
    pub fn resolve(&self, key: &str, payload: &[u8]) -> Result<(NodeAddress, NodeCommand)> {
        if let Some(identifier) = self.keys.node_command_device(key) {
            let command: NodeCommand =
                decode_auto(payload).map_err(|_| BridgeError::Payload(key.to_string()))?;
            let device = self.find_device(identifier)?;
            return Ok((device.address, command));
        }

        let parsed = self.keys.parse(key)?;
        if !parsed.command {
            return Err(BridgeError::NotACommand(key.to_string()));
        }
        let value = decode_payload(payload).ok_or_else(|| BridgeError::Payload(key.to_string()))?;
        let device = self.find_device(&parsed.device)?;

        let command = command_for(&device, parsed.platform, &parsed.key, &value)?;
        Ok((device.address, command))
    }

    pub async fn handle(&self, key: &str, payload: &[u8]) -> Result<()> {
        let (address, command) = self.resolve(key, payload)?;
        debug!(key, address = %address, ?command, "Entity command");
        self.coordinator.execute(address, command).await?;
        Ok(())
    }

    /// Subscribe to every command key and handle samples until shutdown.
    pub async fn run(self, session: Arc<Session>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let entity_keys = self.keys.command_wildcard();
        let node_keys = self.keys.node_command_wildcard();
        let entities = session
            .declare_subscriber(&entity_keys)
            .await
            .map_err(airios_common::Error::Zenoh)?;
        let nodes = session
            .declare_subscriber(&node_keys)
            .await
            .map_err(airios_common::Error::Zenoh)?;
        info!(entities = %entity_keys, nodes = %node_keys, "Listening for commands");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                sample = entities.recv_async() => {
                    let Ok(sample) = sample else {
                        break;
                    };
                    self.handle_sample(sample).await;
                }
                sample = nodes.recv_async() => {
                    let Ok(sample) = sample else {
                        break;
                    };
                    self.handle_sample(sample).await;
                }
            }
        }
        debug!("Command handler stopped");
        Ok(())
    }

    async fn handle_sample(&self, sample: Sample) {
        if sample.kind() == SampleKind::Delete {
            trace!(key = %sample.key_expr(), "Ignoring delete sample");
            return;
        }
        let key = sample.key_expr().as_str();
        let payload = sample.payload().to_bytes();
        if let Err(e) = self.handle(key, &payload).await {
            warn!(key = %key, error = %e, "Command failed");
        }
    }
}
