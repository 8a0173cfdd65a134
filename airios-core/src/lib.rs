//! Airios bridge core
//!
//! Device-independent logic of the Airios RF ventilation integration:
//!
//! - [`coordinator`] - periodic bulk polling into an immutable snapshot
//! - [`binding`] - controller/accessory bind sessions with guaranteed cleanup
//! - [`flow`] - user-facing bind flows built on the orchestrator
//! - [`projection`] - entities, values and availability derived from a snapshot
//! - [`model`] - product families, capabilities and command tables
//! - [`client`] / [`bus`] - the driver interface and its serialized access
//!
//! Register access itself is provided by a [`BridgeClient`] implementation.

pub mod address;
pub mod binding;
pub mod bus;
pub mod client;
pub mod command;
pub mod coordinator;
pub mod error;
pub mod field;
pub mod flow;
pub mod model;
pub mod projection;
pub mod snapshot;

pub use address::{NodeAddress, ProductId, RfAddress, allocate_address};
pub use binding::{
    BindRequest, BindRole, BindTiming, BindingOrchestrator, BoundNode, SessionFailure,
    SessionHandle, SessionProgress,
};
pub use bus::Bus;
pub use client::{BindingStatus, BridgeClient, NodeIdentity};
pub use command::{CommandKind, FanPreset, NodeCommand, RequestedSpeed, ResetMode};
pub use coordinator::{Coordinator, PollHealth};
pub use error::{BindFailure, ClientError, CoreError, Result};
pub use field::{Field, FieldValue, Reading, ResultStatus};
pub use flow::{
    AbortReason, BindFlow, BindingRecord, FlowError, FlowStep, unconfigured_nodes, validate_bridge,
};
pub use model::{Capability, CapabilitySet, ModelDescriptor, ModelDirectory, ModelFamily, NodeRole};
pub use projection::{EntityCommandError, ProjectedDevice, Projection, command_for};
pub use snapshot::{NodeRecord, NodeSnapshotStore};
