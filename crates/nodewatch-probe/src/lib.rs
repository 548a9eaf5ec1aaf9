//! Node probes.
//!
//! A [`Probe`] performs one liveness/correctness check against one node and
//! reports why it failed. The [`ProbeTable`] maps every node type to the
//! probe that checks it.

pub mod bitcoin;
pub mod error;
pub mod price;
pub mod seed;
pub mod transport;
pub mod wire;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use nodewatch_core::{ConfigResult, NodeDescriptor, NodeType, NodewatchConfig, ProbeOutcome};

pub use bitcoin::BitcoinProbe;
pub use error::{ProbeError, ProbeResult};
pub use price::PriceProbe;
pub use seed::SeedProbe;
pub use transport::Connector;

/// Checks one node. Implementations must give up after `timeout`.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, node: &NodeDescriptor, timeout: Duration) -> ProbeResult<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Collapse a probe result into the outcome fed to escalation.
pub fn outcome(result: ProbeResult<()>) -> ProbeOutcome {
    match result {
        Ok(()) => ProbeOutcome::Success,
        Err(e) => ProbeOutcome::Failure(e.to_string()),
    }
}

/// Probe per node type.
#[derive(Clone, Default)]
pub struct ProbeTable {
    probes: BTreeMap<NodeType, Arc<dyn Probe>>,
}

impl ProbeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, node_type: NodeType, probe: Arc<dyn Probe>) -> Self {
        self.probes.insert(node_type, probe);
        self
    }

    pub fn get(&self, node_type: NodeType) -> Option<&Arc<dyn Probe>> {
        self.probes.get(&node_type)
    }

    /// The shipped probes, configured from the `[probes]` and `[tor]` sections.
    pub fn from_config(config: &NodewatchConfig) -> ConfigResult<Self> {
        let connector = Connector::new(config.socks_proxy()?);
        let bitcoin = BitcoinProbe::new(connector, &config.probes.bitcoin_node);

        Ok(Self::new()
            .with(
                NodeType::PriceNode,
                Arc::new(PriceProbe::new(connector, config.probes.price_node.clone())),
            )
            .with(
                NodeType::SeedNode,
                Arc::new(SeedProbe::new(config.probes.seed_node.script.clone())),
            )
            .with(NodeType::BitcoinNode, Arc::new(bitcoin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_become_failures_with_their_reason() {
        assert_eq!(outcome(Ok(())), ProbeOutcome::Success);
        assert_eq!(
            outcome(Err(ProbeError::ExitStatus(1))),
            ProbeOutcome::failure("Exit value is 1")
        );
        assert_eq!(outcome(Err(ProbeError::Timeout)), ProbeOutcome::failure("Timeout"));
    }

    #[test]
    fn table_from_config_covers_every_type() {
        let config = NodewatchConfig::from_toml_str("[[seed_nodes]]\naddress = \"1.2.3.4\"\n").unwrap();
        let table = ProbeTable::from_config(&config).unwrap();
        for node_type in NodeType::ALL {
            assert!(table.get(node_type).is_some(), "{node_type} has no probe");
        }
        assert_eq!(table.get(NodeType::SeedNode).unwrap().name(), "seed");
    }

    #[test]
    fn subversion_pattern_is_taken_literally() {
        let mut config =
            NodewatchConfig::from_toml_str("[[seed_nodes]]\naddress = \"1.2.3.4\"\n").unwrap();
        config.probes.bitcoin_node.subversion_pattern = "(".to_string();
        assert!(ProbeTable::from_config(&config).is_ok());
    }
}
