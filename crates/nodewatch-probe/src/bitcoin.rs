//! Bitcoin node probe: version handshake and service/user-agent check.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use nodewatch_core::NodeDescriptor;
use nodewatch_core::config::BitcoinProbeSettings;

use crate::Probe;
use crate::error::{ProbeError, ProbeResult};
use crate::transport::Connector;
use crate::wire::{self, VersionMessage};

/// Messages tolerated before the peer's `version` shows up.
const MAX_PRELUDE_MESSAGES: usize = 8;

pub struct BitcoinProbe {
    connector: Connector,
    expected_services: u64,
    subversion: String,
    protocol_version: i32,
}

impl BitcoinProbe {
    pub fn new(connector: Connector, settings: &BitcoinProbeSettings) -> Self {
        Self {
            connector,
            expected_services: settings.expected_services,
            subversion: settings.subversion_pattern.clone(),
            protocol_version: settings.protocol_version,
        }
    }

    /// Whether the peer advertises what a healthy node should. The user
    /// agent check is a plain substring match.
    pub fn verify(&self, peer: &VersionMessage) -> bool {
        peer.services == self.expected_services && peer.user_agent.contains(&self.subversion)
    }

    /// Send our `version` and wait for the peer's.
    async fn handshake(&self, node: &NodeDescriptor) -> ProbeResult<VersionMessage> {
        let mut stream = self.connector.connect(node).await?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let ours = VersionMessage::outgoing(self.protocol_version, rand::random(), timestamp);
        stream
            .write_all(&wire::frame("version", &ours.encode()))
            .await
            .map_err(ProbeError::Connect)?;

        for _ in 0..MAX_PRELUDE_MESSAGES {
            let (command, payload) = wire::read_message(&mut stream).await?;
            if command == "version" {
                return VersionMessage::decode(&payload);
            }
            debug!(address = %node.address, %command, "skipping message before version");
        }
        Err(ProbeError::Protocol("peer never sent its version".to_string()))
    }
}

#[async_trait]
impl Probe for BitcoinProbe {
    async fn probe(&self, node: &NodeDescriptor, timeout: Duration) -> ProbeResult<()> {
        let peer = tokio::time::timeout(timeout, self.handshake(node))
            .await
            .map_err(|_| ProbeError::HandshakeTimeout(timeout))??;

        debug!(address = %node.address, %peer, "bitcoin version received");
        if self.verify(&peer) {
            Ok(())
        } else {
            Err(ProbeError::Mismatch(format!(
                "BTC Node has wrong version message: {peer}"
            )))
        }
    }

    fn name(&self) -> &'static str {
        "bitcoin"
    }
}
