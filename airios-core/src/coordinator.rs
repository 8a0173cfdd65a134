//! Polling Coordinator.
//!
//! Owns the refresh loop, the Model Directory and the current snapshot.
//! At most one `fetch_all` is in flight; callers arriving while a cycle
//! runs are satisfied by the next cycle to start after them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::address::NodeAddress;
use crate::bus::Bus;
use crate::command::NodeCommand;
use crate::error::{ClientError, CoreError, Result};
use crate::model::{ModelDescriptor, ModelDirectory};
use crate::snapshot::NodeSnapshotStore;

/// Shortest accepted scan interval.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(15);
/// Longest accepted scan interval; the Ethernet bridge drops idle sockets after 3 minutes.
pub const MAX_SCAN_INTERVAL: Duration = Duration::from_secs(150);
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Availability signal derived from recent poll cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollHealth {
    pub last_update_success: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

type RefreshOutcome = std::result::Result<Arc<NodeSnapshotStore>, ClientError>;

struct Inner {
    bus: Bus,
    models: ModelDirectory,
    scan_interval: Duration,
    snapshot: watch::Sender<Arc<NodeSnapshotStore>>,
    health: watch::Sender<PollHealth>,
    /// Serializes cycles and keeps the outcome of the last one.
    refresh_lock: Mutex<Option<RefreshOutcome>>,
    /// Number of cycles started so far.
    started: AtomicU64,
    forced: Notify,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    task: StdMutex<Option<JoinHandle<()>>>,
}

/// Handle to a running poll loop. Cheap to clone.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Load the Model Directory, run the initial refresh and start the loop.
    ///
    /// Fails with [`CoreError::InitialRefresh`] when the bridge cannot be
    /// read; nothing should be projected in that case.
    pub async fn start(bus: Bus, scan_interval: Duration) -> Result<Self> {
        if !(MIN_SCAN_INTERVAL..=MAX_SCAN_INTERVAL).contains(&scan_interval) {
            return Err(CoreError::config(format!(
                "scan interval {}s outside {}..={}s",
                scan_interval.as_secs(),
                MIN_SCAN_INTERVAL.as_secs(),
                MAX_SCAN_INTERVAL.as_secs()
            )));
        }

        let registry = bus
            .model_registry()
            .await
            .map_err(CoreError::InitialRefresh)?;
        let models = ModelDirectory::from_registry(&registry);
        info!(models = models.len(), "Model directory loaded");

        let coordinator = Self::with_models(bus, models, scan_interval);
        if let Err(e) = coordinator.refresh().await {
            error!(error = %e, "Initial refresh failed");
            if let Err(close) = coordinator.inner.bus.close().await {
                warn!(error = %close, "Failed to close bridge connection");
            }
            return Err(match e {
                CoreError::Client(e) => CoreError::InitialRefresh(e),
                other => other,
            });
        }

        let inner = Arc::clone(&coordinator.inner);
        let handle = tokio::spawn(poll_loop(inner));
        if let Ok(mut task) = coordinator.inner.task.lock() {
            *task = Some(handle);
        }

        info!(
            interval_secs = scan_interval.as_secs(),
            nodes = coordinator.current_snapshot().len(),
            "Polling coordinator started"
        );
        Ok(coordinator)
    }

    fn with_models(bus: Bus, models: ModelDirectory, scan_interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(NodeSnapshotStore::empty()));
        let (health, _) = watch::channel(PollHealth::default());
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                bus,
                models,
                scan_interval,
                snapshot,
                health,
                refresh_lock: Mutex::new(None),
                started: AtomicU64::new(0),
                forced: Notify::new(),
                shutdown,
                closed: AtomicBool::new(false),
                task: StdMutex::new(None),
            }),
        }
    }

    /// The last successfully fetched snapshot.
    pub fn current_snapshot(&self) -> Arc<NodeSnapshotStore> {
        self.inner.snapshot.borrow().clone()
    }

    /// Watch snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<NodeSnapshotStore>> {
        self.inner.snapshot.subscribe()
    }

    pub fn health(&self) -> watch::Receiver<PollHealth> {
        self.inner.health.subscribe()
    }

    pub fn models(&self) -> &ModelDirectory {
        &self.inner.models
    }

    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub fn scan_interval(&self) -> Duration {
        self.inner.scan_interval
    }

    /// Run (or join) a refresh and return its snapshot.
    pub async fn refresh(&self) -> Result<Arc<NodeSnapshotStore>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CoreError::Shutdown);
        }
        Ok(self.inner.refresh().await?)
    }

    /// Ask the loop for an early cycle. Repeated requests coalesce.
    pub fn request_forced_refresh(&self) {
        debug!("Forced refresh requested");
        self.inner.forced.notify_one();
    }

    /// Resolve a node's model descriptor from the current snapshot.
    pub fn model_for(&self, address: NodeAddress) -> Result<ModelDescriptor> {
        let snapshot = self.current_snapshot();
        let record = snapshot
            .get(address)
            .ok_or(CoreError::UnknownNode(address))?;
        let product_id = record.identity.product_id;
        product_id
            .and_then(|p| self.inner.models.resolve(p).ok())
            .cloned()
            .ok_or(CoreError::UnsupportedNode {
                address,
                product_id,
            })
    }

    /// Route a typed command to a node through the bus domain.
    pub async fn execute(&self, address: NodeAddress, command: NodeCommand) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CoreError::Shutdown);
        }
        let kind = command.kind();
        command
            .validate()
            .map_err(|reason| CoreError::InvalidCommand { kind, reason })?;

        let model = self.model_for(address)?;
        if !model.supports(kind) {
            return Err(CoreError::CommandNotSupported { address, kind });
        }

        info!(address = %address, model = %model.family, command = %kind, "Executing command");
        if !self.inner.bus.execute(address, &command).await? {
            warn!(address = %address, command = %kind, "Command rejected by bridge");
            return Err(CoreError::CommandRejected { address, kind });
        }

        self.request_forced_refresh();
        Ok(())
    }

    /// Stop the loop and close the driver connection.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.shutdown.send_replace(true);

        let handle = self.inner.task.lock().ok().and_then(|mut t| t.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Poll loop ended abnormally");
            }
        }

        self.inner.bus.close().await?;
        info!("Polling coordinator stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("scan_interval", &self.inner.scan_interval)
            .field("version", &self.current_snapshot().version())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn refresh(&self) -> RefreshOutcome {
        let seen = self.started.load(Ordering::Acquire);
        let mut last = self.refresh_lock.lock().await;

        // A cycle started after we arrived and has finished; it is fresh enough.
        if self.started.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last.as_ref() {
                return outcome.clone();
            }
        }

        self.started.fetch_add(1, Ordering::AcqRel);
        let outcome = self.run_cycle().await;
        *last = Some(outcome.clone());
        outcome
    }

    async fn run_cycle(&self) -> RefreshOutcome {
        match self.bus.fetch_all().await {
            Ok(records) => {
                let now = Utc::now();
                let version = self.snapshot.borrow().version() + 1;
                let store = Arc::new(NodeSnapshotStore::build(version, now, records));
                debug!(version, nodes = store.len(), "Snapshot replaced");
                self.snapshot.send_replace(Arc::clone(&store));
                self.health.send_modify(|h| {
                    h.last_update_success = true;
                    h.consecutive_failures = 0;
                    h.last_success = Some(now);
                    h.last_error = None;
                });
                Ok(store)
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed, keeping last snapshot");
                self.health.send_modify(|h| {
                    h.last_update_success = false;
                    h.consecutive_failures += 1;
                    h.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }
}

async fn poll_loop(inner: Arc<Inner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut ticker = interval_at(Instant::now() + inner.scan_interval, inner.scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let _ = inner.refresh().await;
            }
            _ = inner.forced.notified() => {
                let _ = inner.refresh().await;
                ticker.reset();
            }
        }
    }
    debug!("Poll loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_interval_bounds() {
        assert!(MIN_SCAN_INTERVAL <= DEFAULT_SCAN_INTERVAL);
        assert!(DEFAULT_SCAN_INTERVAL <= MAX_SCAN_INTERVAL);
    }

    #[test]
    fn test_health_default() {
        let health = PollHealth::default();
        assert!(!health.last_update_success);
        assert_eq!(health.consecutive_failures, 0);
    }
}
