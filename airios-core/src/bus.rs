//! Mutual-exclusion domain over the single bridge connection.
//!
//! Every operation takes the lock, performs exactly one driver call and
//! releases it. The tokio mutex is FIFO, so a bind session polling every
//! 250 ms and the refresh loop interleave without starving each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::trace;

use crate::address::{NodeAddress, ProductId, RfAddress};
use crate::client::{BindingStatus, BridgeClient, NodeIdentity};
use crate::command::NodeCommand;
use crate::error::ClientError;
use crate::snapshot::NodeRecord;

type ClientResult<T> = std::result::Result<T, ClientError>;

/// Shared handle to the bridge driver.
#[derive(Clone)]
pub struct Bus {
    client: Arc<Mutex<Box<dyn BridgeClient>>>,
}

impl Bus {
    pub fn new(client: Box<dyn BridgeClient>) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }

    pub async fn model_registry(&self) -> ClientResult<BTreeMap<String, ProductId>> {
        let mut client = self.client.lock().await;
        trace!("bus: model_registry");
        client.model_registry().await
    }

    pub async fn read_node_identity(&self, node: NodeAddress) -> ClientResult<NodeIdentity> {
        let mut client = self.client.lock().await;
        trace!(address = %node, "bus: read_node_identity");
        client.read_node_identity(node).await
    }

    pub async fn fetch_all(&self) -> ClientResult<Vec<NodeRecord>> {
        let mut client = self.client.lock().await;
        trace!("bus: fetch_all");
        client.fetch_all().await
    }

    pub async fn list_bound_nodes(&self) -> ClientResult<Vec<NodeAddress>> {
        let mut client = self.client.lock().await;
        trace!("bus: list_bound_nodes");
        client.list_bound_nodes().await
    }

    pub async fn send_bind_controller(
        &self,
        node: NodeAddress,
        product: ProductId,
        rf_address: Option<RfAddress>,
    ) -> ClientResult<bool> {
        let mut client = self.client.lock().await;
        trace!(address = %node, product_id = %product, "bus: send_bind_controller");
        client.send_bind_controller(node, product, rf_address).await
    }

    pub async fn send_bind_accessory(
        &self,
        controller: NodeAddress,
        node: NodeAddress,
        product: ProductId,
    ) -> ClientResult<bool> {
        let mut client = self.client.lock().await;
        trace!(controller = %controller, address = %node, product_id = %product, "bus: send_bind_accessory");
        client.send_bind_accessory(controller, node, product).await
    }

    pub async fn query_bind_status(&self) -> ClientResult<BindingStatus> {
        let mut client = self.client.lock().await;
        client.query_bind_status().await
    }

    pub async fn send_unbind(&self, node: NodeAddress) -> ClientResult<bool> {
        let mut client = self.client.lock().await;
        trace!(address = %node, "bus: send_unbind");
        client.send_unbind(node).await
    }

    pub async fn execute(&self, node: NodeAddress, command: &NodeCommand) -> ClientResult<bool> {
        let mut client = self.client.lock().await;
        trace!(address = %node, command = %command.kind(), "bus: execute");
        client.execute(node, command).await
    }

    pub async fn close(&self) -> ClientResult<()> {
        let mut client = self.client.lock().await;
        client.close().await
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").finish_non_exhaustive()
    }
}
