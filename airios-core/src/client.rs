//! Bridge driver interface.
//!
//! Modbus framing, register maps and per-model command encoding live in
//! the driver. The core only calls the operations below, always through
//! the [`Bus`](crate::bus::Bus) so that no two calls overlap.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::{NodeAddress, ProductId, RfAddress};
use crate::command::NodeCommand;
use crate::error::ClientError;
use crate::snapshot::NodeRecord;

/// Identity registers of a node. Each field fails independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub rf_address: Option<RfAddress>,
    pub product_id: Option<ProductId>,
    pub product_name: Option<String>,
    pub sw_version: Option<u16>,
}

/// Bridge-wide bind status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    NotAvailable,
    OutgoingBindingInitialized,
    OutgoingBindingCompleted,
    OutgoingBindingFailedNoAnswer,
    OutgoingBindingFailedIncompatibleDevice,
    OutgoingBindingFailedNodeListFull,
    OutgoingBindingFailedModbusAddressInvalid,
    IncomingBindingActive,
    IncomingBindingCompleted,
    IncomingBindingFailedIncompatibleDevice,
    IncomingBindingFailedNodeListFull,
    IncomingBindingFailedModbusAddressInvalid,
    /// A raw value this build does not know.
    Unknown(u16),
}

impl fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingStatus::NotAvailable => "NOT_AVAILABLE",
            BindingStatus::OutgoingBindingInitialized => "OUTGOING_BINDING_INITIALIZED",
            BindingStatus::OutgoingBindingCompleted => "OUTGOING_BINDING_COMPLETED",
            BindingStatus::OutgoingBindingFailedNoAnswer => "OUTGOING_BINDING_FAILED_NO_ANSWER",
            BindingStatus::OutgoingBindingFailedIncompatibleDevice => {
                "OUTGOING_BINDING_FAILED_INCOMPATIBLE_DEVICE"
            }
            BindingStatus::OutgoingBindingFailedNodeListFull => {
                "OUTGOING_BINDING_FAILED_NODE_LIST_FULL"
            }
            BindingStatus::OutgoingBindingFailedModbusAddressInvalid => {
                "OUTGOING_BINDING_FAILED_MODBUS_ADDRESS_INVALID"
            }
            BindingStatus::IncomingBindingActive => "INCOMING_BINDING_ACTIVE",
            BindingStatus::IncomingBindingCompleted => "INCOMING_BINDING_COMPLETED",
            BindingStatus::IncomingBindingFailedIncompatibleDevice => {
                "INCOMING_BINDING_FAILED_INCOMPATIBLE_DEVICE"
            }
            BindingStatus::IncomingBindingFailedNodeListFull => {
                "INCOMING_BINDING_FAILED_NODE_LIST_FULL"
            }
            BindingStatus::IncomingBindingFailedModbusAddressInvalid => {
                "INCOMING_BINDING_FAILED_MODBUS_ADDRESS_INVALID"
            }
            BindingStatus::Unknown(raw) => return write!(f, "UNKNOWN({})", raw),
        };
        f.write_str(name)
    }
}

/// Operations a bridge driver provides.
///
/// Every method takes `&mut self`: a driver owns one serial line or TCP
/// socket and is never called concurrently.
#[async_trait]
pub trait BridgeClient: Send {
    /// Model keys the driver knows, with their product identifiers.
    async fn model_registry(&mut self) -> Result<BTreeMap<String, ProductId>, ClientError>;

    /// Read the identity registers of one node.
    async fn read_node_identity(&mut self, node: NodeAddress)
    -> Result<NodeIdentity, ClientError>;

    /// Bulk poll of every bound node plus the bridge itself.
    async fn fetch_all(&mut self) -> Result<Vec<NodeRecord>, ClientError>;

    /// Addresses currently bound on the bridge.
    async fn list_bound_nodes(&mut self) -> Result<Vec<NodeAddress>, ClientError>;

    /// Start an outgoing bind of a controller at `node`.
    async fn send_bind_controller(
        &mut self,
        node: NodeAddress,
        product: ProductId,
        rf_address: Option<RfAddress>,
    ) -> Result<bool, ClientError>;

    /// Start an incoming bind of an accessory at `node`, paired with `controller`.
    async fn send_bind_accessory(
        &mut self,
        controller: NodeAddress,
        node: NodeAddress,
        product: ProductId,
    ) -> Result<bool, ClientError>;

    async fn query_bind_status(&mut self) -> Result<BindingStatus, ClientError>;

    /// Release the virtual slot at `node`.
    async fn send_unbind(&mut self, node: NodeAddress) -> Result<bool, ClientError>;

    /// Execute a typed command; `false` means the bridge refused it.
    async fn execute(
        &mut self,
        node: NodeAddress,
        command: &NodeCommand,
    ) -> Result<bool, ClientError>;

    /// Close the underlying connection.
    async fn close(&mut self) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(
            BindingStatus::OutgoingBindingCompleted.to_string(),
            "OUTGOING_BINDING_COMPLETED"
        );
        assert_eq!(BindingStatus::Unknown(42).to_string(), "UNKNOWN(42)");
    }

    #[test]
    fn test_identity_default_is_empty() {
        let identity = NodeIdentity::default();
        assert!(identity.rf_address.is_none());
        assert!(identity.product_id.is_none());
    }
}
