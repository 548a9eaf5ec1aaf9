//! Domain types shared by every nodewatch crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reason recorded when a probe fails without saying why.
pub const EMPTY_REASON: &str = "Empty reason";

// ── Node type ──────────────────────────────────────────────────────

/// Kind of node being monitored.
///
/// Declaration order is the report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    PriceNode,
    SeedNode,
    BitcoinNode,
}

impl NodeType {
    /// All node types in check-cycle order.
    pub const ALL: [NodeType; 3] = [NodeType::PriceNode, NodeType::SeedNode, NodeType::BitcoinNode];

    /// Human-readable name used in alerts and reports.
    pub fn pretty_name(self) -> &'static str {
        match self {
            NodeType::PriceNode => "Price node",
            NodeType::SeedNode => "Seed node",
            NodeType::BitcoinNode => "Bitcoin node",
        }
    }

    /// Configuration key (`price_node`, `seed_node`, `bitcoin_node`).
    pub fn key(self) -> &'static str {
        match self {
            NodeType::PriceNode => "price_node",
            NodeType::SeedNode => "seed_node",
            NodeType::BitcoinNode => "bitcoin_node",
        }
    }

    /// Port used when a configuration entry omits one.
    pub fn default_port(self) -> u16 {
        match self {
            NodeType::PriceNode => 8080,
            NodeType::SeedNode => 8000,
            NodeType::BitcoinNode => 8333,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.key() == s)
            .ok_or_else(|| format!("unknown node type: {s}"))
    }
}

// ── Transport ──────────────────────────────────────────────────────

/// How a node is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Clearnet,
    Onion,
}

impl Transport {
    /// Onion iff the address carries a `.onion` suffix.
    pub fn from_address(address: &str) -> Self {
        if address.contains(".onion") {
            Transport::Onion
        } else {
            Transport::Clearnet
        }
    }
}

// ── Node descriptor ────────────────────────────────────────────────

/// Immutable description of one monitored node. Identity is `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub address: String,
    pub port: u16,
    /// Human label for whoever operates the node.
    pub owner: Option<String>,
    pub node_type: NodeType,
    pub transport: Transport,
}

impl NodeDescriptor {
    /// Build a descriptor, deriving the transport from the address.
    pub fn new(
        address: impl Into<String>,
        port: u16,
        owner: Option<String>,
        node_type: NodeType,
    ) -> Self {
        let address = address.into();
        let transport = Transport::from_address(&address);
        Self {
            address,
            port,
            owner: owner.filter(|o| !o.trim().is_empty()),
            node_type,
            transport,
        }
    }

    pub fn is_onion(&self) -> bool {
        self.transport == Transport::Onion
    }

    /// `address:port`, as handed to connectors and scripts.
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Owner label, or the address when no owner is configured.
    pub fn label(&self) -> &str {
        self.owner.as_deref().unwrap_or(&self.address)
    }

    /// Report ordering key: node type, then owner (or address).
    pub fn sort_key(&self) -> (NodeType, &str, &str) {
        (self.node_type, self.label(), &self.address)
    }
}

// ── Probe outcome ──────────────────────────────────────────────────

/// Result of a single probe against one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(String),
}

impl ProbeOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        ProbeOutcome::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }
}

/// Normalize a failure reason: empty or blank reasons become [`EMPTY_REASON`].
pub fn normalize_reason(reason: &str) -> &str {
    if reason.trim().is_empty() {
        EMPTY_REASON
    } else {
        reason
    }
}

// ── Alert event ────────────────────────────────────────────────────

/// A state change worth telling a human about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    /// A node crossed its escalation threshold.
    Raise {
        node_type: NodeType,
        address: String,
        owner: Option<String>,
        reason: String,
        /// Consecutive failures at the time of the raise.
        failures: u32,
        /// Nodes currently escalated, this one included.
        aggregate_error_count: usize,
    },
    /// An escalated node recovered.
    Clear {
        node_type: NodeType,
        address: String,
        owner: Option<String>,
        /// Nodes still escalated after this recovery.
        aggregate_error_count: usize,
    },
}

impl AlertEvent {
    pub fn node_type(&self) -> NodeType {
        match self {
            AlertEvent::Raise { node_type, .. } | AlertEvent::Clear { node_type, .. } => *node_type,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            AlertEvent::Raise { address, .. } | AlertEvent::Clear { address, .. } => address,
        }
    }

    pub fn is_raise(&self) -> bool {
        matches!(self, AlertEvent::Raise { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_derived_from_onion_suffix() {
        let onion = NodeDescriptor::new("ceaanhbvluug4we6.onion", 80, None, NodeType::PriceNode);
        assert_eq!(onion.transport, Transport::Onion);

        let clear = NodeDescriptor::new("138.68.117.247", 8333, None, NodeType::BitcoinNode);
        assert_eq!(clear.transport, Transport::Clearnet);
    }

    #[test]
    fn label_falls_back_to_address() {
        let node = NodeDescriptor::new("1.2.3.4", 8333, None, NodeType::BitcoinNode);
        assert_eq!(node.label(), "1.2.3.4");

        let owned = NodeDescriptor::new("1.2.3.4", 8333, Some("alice".into()), NodeType::BitcoinNode);
        assert_eq!(owned.label(), "alice");
    }

    #[test]
    fn blank_owner_is_treated_as_absent() {
        let node = NodeDescriptor::new("1.2.3.4", 8333, Some("  ".into()), NodeType::SeedNode);
        assert!(node.owner.is_none());
    }

    #[test]
    fn node_types_order_price_seed_bitcoin() {
        let mut types = vec![NodeType::BitcoinNode, NodeType::PriceNode, NodeType::SeedNode];
        types.sort();
        assert_eq!(types, NodeType::ALL.to_vec());
    }

    #[test]
    fn node_type_parses_config_keys() {
        assert_eq!("bitcoin_node".parse::<NodeType>(), Ok(NodeType::BitcoinNode));
        assert!("monitoring_node".parse::<NodeType>().is_err());
    }

    #[test]
    fn empty_reasons_are_normalized() {
        assert_eq!(normalize_reason(""), EMPTY_REASON);
        assert_eq!(normalize_reason("   "), EMPTY_REASON);
        assert_eq!(normalize_reason("timeout"), "timeout");
    }
}
