//! Entity state publishing to Zenoh.

use std::sync::Arc;

use airios_common::{
    BridgeState, BridgeStatus, EntityState, Format, KeyExprBuilder, current_timestamp_millis,
    encode,
};
use airios_core::coordinator::PollHealth;
use airios_core::{Coordinator, ModelDirectory, NodeSnapshotStore, ProjectedDevice, Projection};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zenoh::Session;

use crate::error::{BridgeError, Result};

pub const BRIDGE_NAME: &str = "airios";

/// Statistics from one publish pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub devices: usize,
    pub success: usize,
    pub failed: usize,
}

/// Status payload for the current poll health.
pub fn bridge_status(health: &PollHealth, nodes: usize) -> BridgeStatus {
    BridgeStatus {
        bridge: BRIDGE_NAME.to_string(),
        state: if health.last_update_success {
            BridgeState::Running
        } else {
            BridgeState::Degraded
        },
        timestamp: current_timestamp_millis(),
        nodes,
        consecutive_failures: health.consecutive_failures,
        last_error: health.last_error.clone(),
    }
}

/// Status payload published on shutdown.
pub fn offline_status() -> BridgeStatus {
    BridgeStatus {
        bridge: BRIDGE_NAME.to_string(),
        state: BridgeState::Offline,
        timestamp: current_timestamp_millis(),
        nodes: 0,
        consecutive_failures: 0,
        last_error: None,
    }
}

/// Publishes projected entity states and bridge status.
#[derive(Clone)]
pub struct StatePublisher {
    session: Arc<Session>,
    keys: KeyExprBuilder,
    format: Format,
    projection: Projection,
}

impl StatePublisher {
    pub fn new(
        session: Arc<Session>,
        keys: KeyExprBuilder,
        format: Format,
        projection: Projection,
    ) -> Self {
        Self {
            session,
            keys,
            format,
            projection,
        }
    }

    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    async fn put(&self, key: String, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(&key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key,
                message: e.to_string(),
            })
    }

    async fn publish_state(&self, state: &EntityState) -> Result<()> {
        let key = self.keys.state_key(&state.device, state.platform, &state.key);
        let payload = encode(state, self.format)?;
        self.put(key, payload).await
    }

    async fn publish_device(&self, device: &ProjectedDevice) -> Result<()> {
        let key = self.keys.device_info_key(&device.identifier());
        let payload = encode(&device.info, self.format)?;
        self.put(key, payload).await
    }

    /// Publish device info and every entity state of a snapshot.
    pub async fn publish_snapshot(
        &self,
        snapshot: &NodeSnapshotStore,
        models: &ModelDirectory,
    ) -> PublishStats {
        let mut stats = PublishStats::default();

        for (device, states) in self.projection.project(snapshot, models, Utc::now()) {
            stats.devices += 1;
            if let Err(e) = self.publish_device(&device).await {
                warn!(device = %device.identifier(), error = %e, "Failed to publish device info");
            }
            for state in &states {
                match self.publish_state(state).await {
                    Ok(()) => stats.success += 1,
                    Err(e) => {
                        stats.failed += 1;
                        warn!(key = %state.key, error = %e, "Failed to publish entity state");
                    }
                }
            }
        }

        debug!(
            version = snapshot.version(),
            devices = stats.devices,
            published = stats.success,
            failed = stats.failed,
            "Snapshot published"
        );
        stats
    }

    /// Bridge status is always JSON.
    pub async fn publish_status(&self, status: &BridgeStatus) -> Result<()> {
        let payload = encode(status, Format::Json)?;
        self.put(self.keys.status_key(), payload).await
    }

    /// Publish every new snapshot and health change until shutdown.
    pub async fn run(self, coordinator: Coordinator, mut shutdown: watch::Receiver<bool>) {
        let mut snapshots = coordinator.subscribe();
        let mut health = coordinator.health();

        let snapshot = snapshots.borrow_and_update().clone();
        self.publish_snapshot(&snapshot, coordinator.models()).await;
        let status = bridge_status(&health.borrow_and_update(), snapshot.len());
        if let Err(e) = self.publish_status(&status).await {
            warn!(error = %e, "Failed to publish bridge status");
        }

        info!(prefix = %self.keys.prefix(), "State publisher started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.publish_snapshot(&snapshot, coordinator.models()).await;
                }
                changed = health.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let nodes = coordinator.current_snapshot().len();
                    let status = bridge_status(&health.borrow_and_update(), nodes);
                    if let Err(e) = self.publish_status(&status).await {
                        warn!(error = %e, "Failed to publish bridge status");
                    }
                }
            }
        }
        debug!("State publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_health() {
        let mut health = PollHealth {
            last_update_success: true,
            ..Default::default()
        };
        let status = bridge_status(&health, 3);
        assert_eq!(status.state, BridgeState::Running);
        assert_eq!(status.nodes, 3);

        health.last_update_success = false;
        health.consecutive_failures = 2;
        health.last_error = Some("Request timed out".to_string());
        let status = bridge_status(&health, 3);
        assert_eq!(status.state, BridgeState::Degraded);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_error.as_deref(), Some("Request timed out"));
    }

    #[test]
    fn test_offline_status() {
        let status = offline_status();
        assert_eq!(status.state, BridgeState::Offline);
        assert_eq!(status.bridge, BRIDGE_NAME);
    }
}
