//! Error types for the coordination core.

use thiserror::Error;

use crate::address::{NodeAddress, ProductId};
use crate::client::BindingStatus;
use crate::command::CommandKind;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures reported by a [`BridgeClient`](crate::client::BridgeClient) driver.
///
/// Cloneable so that one failed refresh can be handed to every waiter
/// coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The bridge did not answer within the transport timeout.
    #[error("Request timed out")]
    Timeout,

    /// The serial line or TCP connection was lost.
    #[error("Connection lost: {0}")]
    Connection(String),

    /// The bridge answered with something that could not be decoded.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The bridge answered with a Modbus exception.
    #[error("Modbus exception: {0}")]
    Exception(String),
}

/// Why a bind session ended in failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindFailure {
    /// No free address in the dynamic bind range.
    #[error("No free node address left on the bridge")]
    AddressExhausted,

    /// The bridge refused the bind command.
    #[error("Bridge rejected the bind command")]
    CommandRejected,

    /// The bridge reported a terminal status other than completion.
    #[error("Binding ended with status {0}")]
    Status(BindingStatus),

    /// The deadline passed while the bridge still reported progress.
    #[error("Binding timed out after {polls} status polls")]
    Timeout { polls: u32 },

    /// The bridge reported success but the new node did not answer an identity query.
    #[error("Bound node did not answer the identity query")]
    PostBindVerificationFailed,

    /// A bus operation failed while the session was running.
    #[error("Transport failure during binding: {0}")]
    Transport(ClientError),
}

impl BindFailure {
    /// Whether the bridge may hold a virtual slot for the allocated address.
    pub fn requires_cleanup(&self) -> bool {
        !matches!(self, Self::AddressExhausted | Self::CommandRejected)
    }
}

/// Errors surfaced by the coordinator, orchestrator and bind flow.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A bus operation failed.
    #[error("Bridge communication failed: {0}")]
    Client(#[from] ClientError),

    /// The first refresh failed; nothing can be projected yet.
    #[error("Initial refresh failed: {0}")]
    InitialRefresh(#[source] ClientError),

    /// Invalid runtime configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No node at this address in the current snapshot.
    #[error("Unknown node {0}")]
    UnknownNode(NodeAddress),

    /// The node's product identifier does not resolve to a known model.
    #[error("Node {address} has unsupported product {product_id:?}")]
    UnsupportedNode {
        address: NodeAddress,
        product_id: Option<ProductId>,
    },

    /// The node's model does not accept this command.
    #[error("Node {address} does not support {kind:?}")]
    CommandNotSupported {
        address: NodeAddress,
        kind: CommandKind,
    },

    /// A command argument is out of range.
    #[error("Invalid {kind} command: {reason}")]
    InvalidCommand { kind: CommandKind, reason: String },

    /// The bridge refused the command.
    #[error("Node {address} rejected {kind:?}")]
    CommandRejected {
        address: NodeAddress,
        kind: CommandKind,
    },

    /// A bind session is already running on this bridge.
    #[error("A bind session is already in progress")]
    BindBusy,

    /// The coordinator has been shut down.
    #[error("Coordinator is shut down")]
    Shutdown,
}

impl CoreError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
