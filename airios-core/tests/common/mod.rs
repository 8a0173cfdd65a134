//! Scripted bridge driver shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use airios_core::{
    BindingStatus, BridgeClient, Bus, ClientError, Field, FieldValue, NodeAddress, NodeCommand,
    NodeIdentity, NodeRecord, ProductId, Reading, RfAddress,
};
use async_trait::async_trait;

pub const BRIDGE_PID: ProductId = ProductId(0x0001C849);
pub const VMD02_PID: ProductId = ProductId(0x0001C892);
pub const VMD07_PID: ProductId = ProductId(0x0001C883);
pub const VMN_PID: ProductId = ProductId(0x0001C852);

pub fn addr(a: u8) -> NodeAddress {
    NodeAddress::new(a).unwrap()
}

pub fn registry() -> BTreeMap<String, ProductId> {
    BTreeMap::from([
        ("BRDG-02R13".to_string(), BRIDGE_PID),
        ("VMD-02RPS78".to_string(), VMD02_PID),
        ("VMD-07RPS13".to_string(), VMD07_PID),
        ("VMN-05LM02".to_string(), VMN_PID),
    ])
}

pub fn identity(pid: ProductId, rf: u32) -> NodeIdentity {
    NodeIdentity {
        rf_address: Some(RfAddress(rf)),
        product_id: Some(pid),
        product_name: None,
        sw_version: Some(0x0100),
    }
}

/// Bridge at 207 plus a VMD-02 unit at 2.
pub fn default_records() -> Vec<NodeRecord> {
    vec![
        NodeRecord::new(addr(207), identity(BRIDGE_PID, 0x00FF01)),
        NodeRecord::new(addr(2), identity(VMD02_PID, 0x00A102)).with_field(
            Field::SupplyFanSpeed,
            Reading::new(FieldValue::Integer(40)),
        ),
    ]
}

/// A driver call, in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ModelRegistry,
    ReadIdentity(NodeAddress),
    FetchAll,
    ListBound,
    BindController(NodeAddress, ProductId, Option<RfAddress>),
    BindAccessory(NodeAddress, NodeAddress, ProductId),
    QueryStatus,
    Unbind(NodeAddress),
    Execute(NodeAddress, NodeCommand),
    Close,
}

#[derive(Debug)]
pub struct Script {
    pub registry: Result<BTreeMap<String, ProductId>, ClientError>,
    /// Consumed one per fetch; `default_records()` once empty.
    pub fetches: VecDeque<Result<Vec<NodeRecord>, ClientError>>,
    pub fetch_delay: Duration,
    pub bound: Vec<NodeAddress>,
    pub bind_sent: Result<bool, ClientError>,
    /// Consumed one per status query; `idle_status` once empty.
    pub statuses: VecDeque<BindingStatus>,
    pub idle_status: BindingStatus,
    /// Returned by the next status query instead of a status.
    pub status_failure: Option<ClientError>,
    pub identities: BTreeMap<NodeAddress, NodeIdentity>,
    /// Consumed one per unbind; `Ok(true)` once empty.
    pub unbinds: VecDeque<Result<bool, ClientError>>,
    pub execute_accepted: bool,
    pub close_result: Result<(), ClientError>,
    pub calls: Vec<Call>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            registry: Ok(registry()),
            fetches: VecDeque::new(),
            fetch_delay: Duration::ZERO,
            bound: vec![addr(2)],
            bind_sent: Ok(true),
            statuses: VecDeque::new(),
            idle_status: BindingStatus::NotAvailable,
            status_failure: None,
            identities: BTreeMap::new(),
            unbinds: VecDeque::new(),
            execute_accepted: true,
            close_result: Ok(()),
            calls: Vec::new(),
        }
    }
}

/// Test-side handle on the script of a [`MockBridge`].
#[derive(Debug, Clone, Default)]
pub struct MockHandle(Arc<Mutex<Script>>);

impl MockHandle {
    pub fn script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script(|s| s.calls.clone())
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn fetches(&self) -> usize {
        self.count(|c| *c == Call::FetchAll)
    }

    pub fn unbinds(&self) -> Vec<NodeAddress> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Unbind(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn bus(&self) -> Bus {
        Bus::new(Box::new(MockBridge(self.clone())))
    }
}

pub struct MockBridge(MockHandle);

impl MockBridge {
    fn record(&self, call: Call) {
        self.0.script(|s| s.calls.push(call));
    }
}

#[async_trait]
impl BridgeClient for MockBridge {
    async fn model_registry(&mut self) -> Result<BTreeMap<String, ProductId>, ClientError> {
        self.record(Call::ModelRegistry);
        self.0.script(|s| s.registry.clone())
    }

    async fn read_node_identity(
        &mut self,
        node: NodeAddress,
    ) -> Result<NodeIdentity, ClientError> {
        self.record(Call::ReadIdentity(node));
        Ok(self
            .0
            .script(|s| s.identities.get(&node).cloned().unwrap_or_default()))
    }

    async fn fetch_all(&mut self) -> Result<Vec<NodeRecord>, ClientError> {
        self.record(Call::FetchAll);
        let (delay, outcome) = self.0.script(|s| {
            let outcome = s.fetches.pop_front().unwrap_or_else(|| Ok(default_records()));
            (s.fetch_delay, outcome)
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn list_bound_nodes(&mut self) -> Result<Vec<NodeAddress>, ClientError> {
        self.record(Call::ListBound);
        Ok(self.0.script(|s| s.bound.clone()))
    }

    async fn send_bind_controller(
        &mut self,
        node: NodeAddress,
        product: ProductId,
        rf_address: Option<RfAddress>,
    ) -> Result<bool, ClientError> {
        self.record(Call::BindController(node, product, rf_address));
        self.0.script(|s| s.bind_sent.clone())
    }

    async fn send_bind_accessory(
        &mut self,
        controller: NodeAddress,
        node: NodeAddress,
        product: ProductId,
    ) -> Result<bool, ClientError> {
        self.record(Call::BindAccessory(controller, node, product));
        self.0.script(|s| s.bind_sent.clone())
    }

    async fn query_bind_status(&mut self) -> Result<BindingStatus, ClientError> {
        self.record(Call::QueryStatus);
        self.0.script(|s| match s.status_failure.take() {
            Some(e) => Err(e),
            None => Ok(s.statuses.pop_front().unwrap_or(s.idle_status)),
        })
    }

    async fn send_unbind(&mut self, node: NodeAddress) -> Result<bool, ClientError> {
        self.record(Call::Unbind(node));
        self.0.script(|s| s.unbinds.pop_front().unwrap_or(Ok(true)))
    }

    async fn execute(
        &mut self,
        node: NodeAddress,
        command: &NodeCommand,
    ) -> Result<bool, ClientError> {
        self.record(Call::Execute(node, command.clone()));
        Ok(self.0.script(|s| s.execute_accepted))
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.record(Call::Close);
        self.0.script(|s| s.close_result.clone())
    }
}
