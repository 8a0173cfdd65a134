//! Node Snapshot Store.
//!
//! One store is built per successful poll cycle and then shared read-only.
//! The coordinator replaces the whole store; nothing mutates it in place.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::address::{NodeAddress, RfAddress};
use crate::client::NodeIdentity;
use crate::field::{Field, FieldValue, Reading};
use crate::model::CapabilitySet;

/// Latest polled state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub address: NodeAddress,
    pub identity: NodeIdentity,
    /// Absent keys are temporarily unavailable.
    #[serde(default)]
    pub fields: BTreeMap<Field, Reading>,
}

impl NodeRecord {
    pub fn new(address: NodeAddress, identity: NodeIdentity) -> Self {
        Self {
            address,
            identity,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style insert, handy for drivers and tests.
    pub fn with_field(mut self, field: Field, reading: Reading) -> Self {
        self.fields.insert(field, reading);
        self
    }

    pub fn get(&self, field: Field) -> Option<&Reading> {
        self.fields.get(&field)
    }

    pub fn value(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field).map(|r| &r.value)
    }

    /// Capability register, if the node reported one.
    pub fn reported_capabilities(&self) -> Option<CapabilitySet> {
        match self.value(Field::Capabilities) {
            Some(FieldValue::Capabilities(set)) => Some(*set),
            _ => None,
        }
    }
}

/// Versioned, immutable map of node records keyed by bus address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSnapshotStore {
    version: u64,
    fetched_at: Option<DateTime<Utc>>,
    nodes: BTreeMap<NodeAddress, NodeRecord>,
}

impl NodeSnapshotStore {
    /// The store before any successful fetch.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from one `fetch_all` result.
    ///
    /// A repeated bus address keeps its first record. An RF address seen
    /// on more than one node stays with the lowest bus address.
    pub fn build(version: u64, fetched_at: DateTime<Utc>, records: Vec<NodeRecord>) -> Self {
        let mut nodes: BTreeMap<NodeAddress, NodeRecord> = BTreeMap::new();
        for record in records {
            if nodes.contains_key(&record.address) {
                warn!(address = %record.address, "Dropping repeated node record");
                continue;
            }
            nodes.insert(record.address, record);
        }

        let mut seen = BTreeSet::new();
        nodes.retain(|address, record| match record.identity.rf_address {
            Some(rf) if !seen.insert(rf) => {
                warn!(address = %address, rf_address = %rf, "Dropping node with duplicate RF address");
                false
            }
            _ => true,
        });

        Self {
            version,
            fetched_at: Some(fetched_at),
            nodes,
        }
    }

    pub fn get(&self, address: NodeAddress) -> Option<&NodeRecord> {
        self.nodes.get(&address)
    }

    /// Nodes in ascending address order.
    pub fn all(&self) -> impl Iterator<Item = (NodeAddress, &NodeRecord)> {
        self.nodes.iter().map(|(a, r)| (*a, r))
    }

    pub fn find_by_rf(&self, rf_address: RfAddress) -> Option<&NodeRecord> {
        self.nodes
            .values()
            .find(|r| r.identity.rf_address == Some(rf_address))
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.nodes.keys().copied().collect()
    }

    /// Monotonic cycle number; 0 until the first successful fetch.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ProductId;

    fn node(address: u8, rf: u32) -> NodeRecord {
        NodeRecord::new(
            NodeAddress::new(address).unwrap(),
            NodeIdentity {
                rf_address: Some(RfAddress(rf)),
                product_id: Some(ProductId(0x0001C892)),
                product_name: None,
                sw_version: None,
            },
        )
    }

    #[test]
    fn test_ordered_by_address() {
        let store = NodeSnapshotStore::build(1, Utc::now(), vec![node(5, 0x5), node(2, 0x2)]);
        let order: Vec<u8> = store.all().map(|(a, _)| a.get()).collect();
        assert_eq!(order, vec![2, 5]);
        assert_eq!(store.version(), 1);
        assert!(store.fetched_at().is_some());
    }

    #[test]
    fn test_duplicate_rf_keeps_lowest_address() {
        let store = NodeSnapshotStore::build(
            1,
            Utc::now(),
            vec![node(9, 0xABCDEF), node(3, 0xABCDEF), node(4, 0x1)],
        );
        assert_eq!(store.len(), 2);
        let owner = store.find_by_rf(RfAddress(0xABCDEF)).unwrap();
        assert_eq!(owner.address.get(), 3);
        assert!(store.get(NodeAddress::new(9).unwrap()).is_none());
    }

    #[test]
    fn test_repeated_address_keeps_first() {
        let store = NodeSnapshotStore::build(1, Utc::now(), vec![node(2, 0x10), node(2, 0x20)]);
        assert_eq!(store.len(), 1);
        assert!(store.find_by_rf(RfAddress(0x10)).is_some());
    }

    #[test]
    fn test_nodes_without_rf_are_kept() {
        let mut anonymous = node(7, 0);
        anonymous.identity.rf_address = None;
        let store = NodeSnapshotStore::build(1, Utc::now(), vec![anonymous.clone(), {
            let mut other = node(8, 0);
            other.identity.rf_address = None;
            other
        }]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(NodeAddress::new(7).unwrap()), Some(&anonymous));
    }

    #[test]
    fn test_empty_store() {
        let store = NodeSnapshotStore::empty();
        assert_eq!(store.version(), 0);
        assert!(store.fetched_at().is_none());
        assert!(store.is_empty());
    }
}
