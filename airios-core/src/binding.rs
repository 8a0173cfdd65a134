//! Binding Orchestrator: RF pairing of new nodes.
//!
//! A session allocates an address, sends the role-specific bind command,
//! polls the bridge-wide bind status register and reconciles the result.
//! Any failure that may have left a virtual slot on the bridge is followed
//! by an unbind of the allocated address before it is reported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, TryAcquireError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::address::{NodeAddress, ProductId, RfAddress, allocate_address};
use crate::bus::Bus;
use crate::client::BindingStatus;
use crate::coordinator::Coordinator;
use crate::error::{BindFailure, CoreError, Result};

/// Unbind attempts made before a slot is reported as leaked.
pub const UNBIND_ATTEMPTS: u32 = 3;

/// Role of the node being bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindRole {
    Controller,
    Accessory,
}

impl BindRole {
    /// Status the bridge reports while the handshake is running.
    pub fn in_progress_status(&self) -> BindingStatus {
        match self {
            BindRole::Controller => BindingStatus::OutgoingBindingInitialized,
            BindRole::Accessory => BindingStatus::IncomingBindingActive,
        }
    }

    pub fn completed_status(&self) -> BindingStatus {
        match self {
            BindRole::Controller => BindingStatus::OutgoingBindingCompleted,
            BindRole::Accessory => BindingStatus::IncomingBindingCompleted,
        }
    }
}

impl std::fmt::Display for BindRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindRole::Controller => write!(f, "controller"),
            BindRole::Accessory => write!(f, "accessory"),
        }
    }
}

/// Status polling cadence and per-role deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindTiming {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    pub controller_polls: u32,
    /// An accessory waits for someone to press the pairing button on the remote.
    pub accessory_polls: u32,
}

impl Default for BindTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            controller_polls: 80,
            accessory_polls: 500,
        }
    }
}

impl BindTiming {
    pub fn polls_for(&self, role: BindRole) -> u32 {
        match role {
            BindRole::Controller => self.controller_polls,
            BindRole::Accessory => self.accessory_polls,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// What to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRequest {
    Controller {
        product_id: ProductId,
        rf_address: Option<RfAddress>,
    },
    Accessory {
        controller: NodeAddress,
        product_id: ProductId,
    },
}

impl BindRequest {
    pub fn role(&self) -> BindRole {
        match self {
            BindRequest::Controller { .. } => BindRole::Controller,
            BindRequest::Accessory { .. } => BindRole::Accessory,
        }
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            BindRequest::Controller { product_id, .. }
            | BindRequest::Accessory { product_id, .. } => *product_id,
        }
    }
}

/// A node that completed binding and answered the identity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundNode {
    pub role: BindRole,
    pub address: NodeAddress,
    pub product_id: ProductId,
    pub rf_address: RfAddress,
}

/// Terminal failure of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub reason: BindFailure,
    /// Address allocated for the session, if allocation got that far.
    pub address: Option<NodeAddress>,
    /// `false` only when cleanup was needed and every unbind attempt failed.
    pub released: bool,
}

/// Coarse session state as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionProgress {
    InProgress,
    Succeeded(BoundNode),
    Failed(SessionFailure),
}

impl SessionProgress {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionProgress::InProgress)
    }
}

/// Caller's view of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    role: BindRole,
    state: watch::Receiver<SessionProgress>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> BindRole {
        self.role
    }

    /// Current state without waiting.
    pub fn progress(&self) -> SessionProgress {
        self.state.borrow().clone()
    }

    /// Wait for the terminal state.
    pub async fn wait(&mut self) -> SessionProgress {
        let terminal = self
            .state
            .wait_for(SessionProgress::is_terminal)
            .await
            .map(|state| (*state).clone());
        match terminal {
            Ok(state) => state,
            // The task dropped its sender; whatever it left last is final.
            Err(_) => self.state.borrow().clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Runs bind sessions, one at a time per bridge.
pub struct BindingOrchestrator {
    coordinator: Coordinator,
    timing: BindTiming,
    permit: Arc<Semaphore>,
    next_id: AtomicU64,
    abandoned: StdMutex<Vec<SessionHandle>>,
}

impl BindingOrchestrator {
    pub fn new(coordinator: Coordinator, timing: BindTiming) -> Self {
        Self {
            coordinator,
            timing,
            permit: Arc::new(Semaphore::new(1)),
            next_id: AtomicU64::new(1),
            abandoned: StdMutex::new(Vec::new()),
        }
    }

    pub fn timing(&self) -> BindTiming {
        self.timing
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Start a session in the background.
    ///
    /// Fails with [`CoreError::BindBusy`] while another session runs and
    /// with [`CoreError::Shutdown`] once [`shutdown`](Self::shutdown) was called.
    pub fn start_bind_session(&self, request: BindRequest) -> Result<SessionHandle> {
        let permit = Arc::clone(&self.permit)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => CoreError::BindBusy,
                TryAcquireError::Closed => CoreError::Shutdown,
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let role = request.role();
        let (tx, rx) = watch::channel(SessionProgress::InProgress);
        let session = Session {
            id,
            request,
            bus: self.coordinator.bus().clone(),
            coordinator: self.coordinator.clone(),
            timing: self.timing,
        };

        info!(session = id, role = %role, product_id = %request.product_id(), "Bind session started");
        let task = tokio::spawn(async move {
            let outcome = session.run().await;
            tx.send_replace(outcome);
            drop(permit);
        });

        Ok(SessionHandle {
            id,
            role,
            state: rx,
            task,
        })
    }

    pub fn poll_session(&self, handle: &SessionHandle) -> SessionProgress {
        handle.progress()
    }

    /// Detach from a session. It keeps running and is collected by [`reap`](Self::reap).
    pub fn abandon(&self, handle: SessionHandle) {
        debug!(session = handle.id, "Bind session abandoned");
        if let Ok(mut abandoned) = self.abandoned.lock() {
            abandoned.push(handle);
        }
    }

    /// Collect abandoned sessions that have finished.
    pub fn reap(&self) -> Vec<(u64, SessionProgress)> {
        let Ok(mut abandoned) = self.abandoned.lock() else {
            return Vec::new();
        };
        let (done, running): (Vec<_>, Vec<_>) = abandoned
            .drain(..)
            .partition(|h| h.progress().is_terminal());
        *abandoned = running;

        done.into_iter()
            .map(|h| {
                let progress = h.progress();
                info!(session = h.id, outcome = ?progress, "Reaped abandoned bind session");
                (h.id, progress)
            })
            .collect()
    }

    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Wait for the running session, abandoned or not, and refuse new ones.
    ///
    /// Sessions poll and unbind through the coordinator's bus, so this must
    /// complete before [`Coordinator::shutdown`] closes it. Returns the
    /// outcomes of abandoned sessions.
    pub async fn shutdown(&self) -> Vec<(u64, SessionProgress)> {
        if self.permit.is_closed() {
            return Vec::new();
        }
        if self.is_busy() {
            info!("Waiting for the bind session to finish");
        }
        // The permit is released only after the outcome has been published.
        if let Ok(_idle) = self.permit.acquire().await {
            self.permit.close();
        }

        let handles = match self.abandoned.lock() {
            Ok(mut abandoned) => std::mem::take(&mut *abandoned),
            Err(_) => Vec::new(),
        };
        let mut outcomes = Vec::with_capacity(handles.len());
        for mut handle in handles {
            let progress = handle.wait().await;
            if let Err(e) = (&mut handle.task).await {
                warn!(session = handle.id, error = %e, "Bind session task ended abnormally");
            }
            info!(session = handle.id, outcome = ?progress, "Reaped abandoned bind session");
            outcomes.push((handle.id, progress));
        }
        debug!("Binding orchestrator stopped");
        outcomes
    }
}

struct Session {
    id: u64,
    request: BindRequest,
    bus: Bus,
    coordinator: Coordinator,
    timing: BindTiming,
}

impl Session {
    async fn run(&self) -> SessionProgress {
        let role = self.request.role();
        let product_id = self.request.product_id();

        let bound = match self.bus.list_bound_nodes().await {
            Ok(bound) => bound,
            Err(e) => return self.fail(BindFailure::Transport(e), None, false).await,
        };
        let address = match allocate_address(&bound) {
            Ok(address) => address,
            Err(reason) => return self.fail(reason, None, false).await,
        };
        info!(session = self.id, address = %address, "Allocated node address");

        let sent = match self.request {
            BindRequest::Controller { rf_address, .. } => {
                self.bus
                    .send_bind_controller(address, product_id, rf_address)
                    .await
            }
            BindRequest::Accessory { controller, .. } => {
                self.bus
                    .send_bind_accessory(controller, address, product_id)
                    .await
            }
        };
        match sent {
            Ok(true) => {}
            Ok(false) => {
                return self
                    .fail(BindFailure::CommandRejected, Some(address), false)
                    .await;
            }
            Err(e) => {
                warn!(session = self.id, error = %e, "Bind command could not be sent");
                return self
                    .fail(BindFailure::CommandRejected, Some(address), false)
                    .await;
            }
        }

        let max_polls = self.timing.polls_for(role);
        let mut status = BindingStatus::NotAvailable;
        let mut settled = false;
        for _ in 0..max_polls {
            tokio::time::sleep(self.timing.poll_interval).await;
            status = match self.bus.query_bind_status().await {
                Ok(status) => status,
                Err(e) => {
                    return self
                        .fail(BindFailure::Transport(e), Some(address), true)
                        .await;
                }
            };
            debug!(session = self.id, status = %status, "Bind status");
            if status != role.in_progress_status() {
                settled = true;
                break;
            }
        }

        if !settled {
            return self
                .fail(
                    BindFailure::Timeout { polls: max_polls },
                    Some(address),
                    true,
                )
                .await;
        }
        if status != role.completed_status() {
            return self
                .fail(BindFailure::Status(status), Some(address), true)
                .await;
        }

        let rf_address = match self.bus.read_node_identity(address).await {
            Ok(identity) => identity.rf_address,
            Err(e) => {
                warn!(session = self.id, error = %e, "Identity read after bind failed");
                None
            }
        };
        let Some(rf_address) = rf_address else {
            return self
                .fail(BindFailure::PostBindVerificationFailed, Some(address), true)
                .await;
        };

        info!(
            session = self.id,
            role = %role,
            address = %address,
            rf_address = %rf_address,
            "Bind completed"
        );
        self.coordinator.request_forced_refresh();
        SessionProgress::Succeeded(BoundNode {
            role,
            address,
            product_id,
            rf_address,
        })
    }

    async fn fail(
        &self,
        reason: BindFailure,
        address: Option<NodeAddress>,
        cleanup: bool,
    ) -> SessionProgress {
        let released = match address {
            Some(address) if cleanup && reason.requires_cleanup() => self.release(address).await,
            _ => true,
        };
        warn!(session = self.id, reason = %reason, released, "Bind failed");
        SessionProgress::Failed(SessionFailure {
            reason,
            address,
            released,
        })
    }

    async fn release(&self, address: NodeAddress) -> bool {
        for attempt in 1..=UNBIND_ATTEMPTS {
            match self.bus.send_unbind(address).await {
                Ok(true) => {
                    info!(session = self.id, address = %address, "Released virtual node slot");
                    return true;
                }
                Ok(false) => {
                    warn!(session = self.id, address = %address, attempt, "Unbind refused");
                }
                Err(e) => {
                    warn!(session = self.id, address = %address, attempt, error = %e, "Unbind failed");
                }
            }
        }
        false
    }
}
