//! Bus, RF and product identifiers.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::BindFailure;

/// Addresses the bridge hands out to dynamically bound nodes.
pub const BIND_ADDRESS_RANGE: RangeInclusive<u8> = 2..=199;

/// Highest valid Modbus unit address.
pub const MAX_NODE_ADDRESS: u8 = 247;

/// Modbus bus address of a node bound to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeAddress(u8);

impl NodeAddress {
    /// Create a node address, rejecting 0 and anything above 247.
    pub fn new(address: u8) -> Option<Self> {
        if (1..=MAX_NODE_ADDRESS).contains(&address) {
            Some(Self(address))
        } else {
            None
        }
    }

    /// The raw bus address.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeAddress {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("node address {} outside 1-247", value))
    }
}

impl From<NodeAddress> for u8 {
    fn from(address: NodeAddress) -> Self {
        address.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hardware RF address burned into a device.
///
/// Stable across re-binds, so it is the device identity used by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RfAddress(pub u32);

impl fmt::Display for RfAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06X}", self.0)
    }
}

/// Product identifier read from a node's identification register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u32);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Pick the lowest free address in [`BIND_ADDRESS_RANGE`].
pub fn allocate_address(bound: &[NodeAddress]) -> Result<NodeAddress, BindFailure> {
    BIND_ADDRESS_RANGE
        .filter_map(NodeAddress::new)
        .find(|candidate| !bound.contains(candidate))
        .ok_or(BindFailure::AddressExhausted)
}
