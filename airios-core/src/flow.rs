//! User-facing bind flow.
//!
//! Validates form input, drives one orchestrator session and turns its
//! outcome into either a persisted [`BindingRecord`] or a readable abort
//! reason. Bridge validation for a new connection lives here as well.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::address::{NodeAddress, ProductId, RfAddress};
use crate::binding::{
    BindRequest, BindRole, BindingOrchestrator, SessionFailure, SessionHandle, SessionProgress,
};
use crate::bus::Bus;
use crate::error::{BindFailure, ClientError, CoreError};
use crate::model::{ModelDirectory, ModelError, ModelFamily, NodeRole};
use crate::snapshot::NodeSnapshotStore;

/// Persisted record of a node bound through the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub name: String,
    pub role: BindRole,
    pub address: NodeAddress,
    pub product_id: ProductId,
    pub rf_address: RfAddress,
}

/// Input of the controller form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerForm {
    pub name: String,
    /// Product display name, e.g. "Siber DF Optima 2".
    pub product: String,
    #[serde(default)]
    pub rf_address: Option<RfAddress>,
}

/// Input of the accessory form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessoryForm {
    pub name: String,
    /// Bus address of an already bound controller.
    pub controller: NodeAddress,
    pub product: String,
}

/// Flow errors raised before a session is running.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Cannot connect to bridge: {0}")]
    CannotConnect(#[source] ClientError),

    #[error("Unexpected product id {0:?}")]
    UnexpectedProductId(Option<ProductId>),

    #[error("Unknown product '{0}'")]
    UnknownProduct(String),

    #[error("Product '{product}' cannot be bound as {expected}")]
    WrongRole { product: String, expected: BindRole },

    #[error("No controller bound at address {0}")]
    UnknownController(NodeAddress),

    #[error("Name must not be empty")]
    InvalidName,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Why a flow ended without a new binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortReason {
    /// Stable machine-readable code.
    pub code: String,
    pub message: String,
}

impl AbortReason {
    fn from_failure(failure: &SessionFailure) -> Self {
        let code = match &failure.reason {
            BindFailure::AddressExhausted => "address_exhausted".to_string(),
            BindFailure::CommandRejected => "bind_failed".to_string(),
            BindFailure::Status(status) => status.to_string(),
            BindFailure::Timeout { .. } => "bind_timeout".to_string(),
            BindFailure::PostBindVerificationFailed => "verification_failed".to_string(),
            BindFailure::Transport(_) => "cannot_connect".to_string(),
        };
        let mut message = failure.reason.to_string();
        if !failure.released {
            if let Some(address) = failure.address {
                message.push_str(&format!(
                    "; node slot {} could not be released and may need a manual unbind",
                    address
                ));
            }
        }
        Self { code, message }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Result of one flow step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStep {
    Progress,
    Done(BindingRecord),
    Abort(AbortReason),
}

/// One bind attempt from form input to record.
#[derive(Debug)]
pub struct BindFlow {
    name: String,
    request: BindRequest,
    session: Option<SessionHandle>,
}

impl BindFlow {
    /// Validate a controller form.
    pub fn controller(models: &ModelDirectory, form: ControllerForm) -> Result<Self, FlowError> {
        let name = checked_name(&form.name)?;
        let product_id = product_for(models, &form.product, BindRole::Controller)?;
        Ok(Self {
            name,
            request: BindRequest::Controller {
                product_id,
                rf_address: form.rf_address,
            },
            session: None,
        })
    }

    /// Validate an accessory form against the known controller records.
    pub fn accessory(
        models: &ModelDirectory,
        records: &[BindingRecord],
        form: AccessoryForm,
    ) -> Result<Self, FlowError> {
        let name = checked_name(&form.name)?;
        let known_controller = records
            .iter()
            .any(|r| r.role == BindRole::Controller && r.address == form.controller);
        if !known_controller {
            return Err(FlowError::UnknownController(form.controller));
        }
        let product_id = product_for(models, &form.product, BindRole::Accessory)?;
        Ok(Self {
            name,
            request: BindRequest::Accessory {
                controller: form.controller,
                product_id,
            },
            session: None,
        })
    }

    pub fn request(&self) -> BindRequest {
        self.request
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the background session.
    pub fn start(&mut self, orchestrator: &BindingOrchestrator) -> Result<(), FlowError> {
        if self.session.is_none() {
            self.session = Some(orchestrator.start_bind_session(self.request)?);
        }
        Ok(())
    }

    /// Report the current state without blocking.
    pub fn step(&self) -> FlowStep {
        match &self.session {
            Some(session) => self.finish(session.progress()),
            None => FlowStep::Progress,
        }
    }

    /// Wait until the session ends.
    pub async fn wait(&mut self) -> FlowStep {
        match self.session.as_mut() {
            Some(session) => {
                let progress = session.wait().await;
                self.finish(progress)
            }
            None => FlowStep::Progress,
        }
    }

    /// Hand the running session to the orchestrator and give up on it.
    pub fn abandon(mut self, orchestrator: &BindingOrchestrator) {
        if let Some(session) = self.session.take() {
            orchestrator.abandon(session);
        }
    }

    fn finish(&self, progress: SessionProgress) -> FlowStep {
        match progress {
            SessionProgress::InProgress => FlowStep::Progress,
            SessionProgress::Succeeded(node) => {
                info!(name = %self.name, address = %node.address, rf_address = %node.rf_address, "Binding recorded");
                FlowStep::Done(BindingRecord {
                    name: self.name.clone(),
                    role: node.role,
                    address: node.address,
                    product_id: node.product_id,
                    rf_address: node.rf_address,
                })
            }
            SessionProgress::Failed(failure) => {
                let reason = AbortReason::from_failure(&failure);
                warn!(name = %self.name, reason = %reason, "Binding aborted");
                FlowStep::Abort(reason)
            }
        }
    }
}

fn checked_name(name: &str) -> Result<String, FlowError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FlowError::InvalidName);
    }
    Ok(name.to_string())
}

fn product_for(
    models: &ModelDirectory,
    display_name: &str,
    role: BindRole,
) -> Result<ProductId, FlowError> {
    let family = ModelFamily::from_display_name(display_name)
        .ok_or_else(|| FlowError::UnknownProduct(display_name.to_string()))?;
    let expected = match role {
        BindRole::Controller => NodeRole::Controller,
        BindRole::Accessory => NodeRole::Accessory,
    };
    if family.role() != expected {
        return Err(FlowError::WrongRole {
            product: display_name.to_string(),
            expected: role,
        });
    }
    Ok(models.family(family)?.product_id)
}

/// Check that `address` hosts a supported bridge and return its RF address.
///
/// The RF address is the bridge's unique id.
pub async fn validate_bridge(
    bus: &Bus,
    models: &ModelDirectory,
    address: NodeAddress,
) -> Result<RfAddress, FlowError> {
    let identity = bus
        .read_node_identity(address)
        .await
        .map_err(FlowError::CannotConnect)?;

    let is_bridge = identity
        .product_id
        .and_then(|p| models.resolve(p).ok())
        .is_some_and(|d| d.role == NodeRole::Bridge);
    if !is_bridge {
        return Err(FlowError::UnexpectedProductId(identity.product_id));
    }

    identity
        .rf_address
        .ok_or(FlowError::UnexpectedProductId(identity.product_id))
}

/// Nodes bound on the bridge that have no binding record yet.
///
/// Only controllers and accessories with a complete identity are offered;
/// names default to the model key and bus address.
pub fn unconfigured_nodes(
    snapshot: &NodeSnapshotStore,
    models: &ModelDirectory,
    records: &[BindingRecord],
) -> Vec<BindingRecord> {
    snapshot
        .all()
        .filter(|(address, _)| !records.iter().any(|r| r.address == *address))
        .filter_map(|(address, record)| {
            let product_id = record.identity.product_id?;
            let rf_address = record.identity.rf_address?;
            let model = models.resolve(product_id).ok()?;
            let role = match model.role {
                NodeRole::Controller => BindRole::Controller,
                NodeRole::Accessory => BindRole::Accessory,
                NodeRole::Bridge => return None,
            };
            Some(BindingRecord {
                name: format!("{} {}", model.family, address),
                role,
                address,
                product_id,
                rf_address,
            })
        })
        .collect()
}
