//! nodewatch.toml configuration parser.
//!
//! The document enumerates the monitored nodes per node type plus the
//! global monitor settings. Every section is optional except the node
//! lists, and missing fields fall back to the defaults below.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{NodeDescriptor, NodeType, Transport};

/// Environment variable prefix for webhook overrides, e.g.
/// `NODEWATCH_WEBHOOK_BITCOIN_NODE`.
const WEBHOOK_ENV_PREFIX: &str = "NODEWATCH_WEBHOOK_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodewatchConfig {
    pub monitor: MonitorSettings,
    pub status: StatusSettings,
    pub tor: TorSettings,
    pub probes: ProbeSettings,
    pub alerts: AlertSettings,
    pub price_nodes: Vec<NodeEntry>,
    pub seed_nodes: Vec<NodeEntry>,
    pub bitcoin_nodes: Vec<NodeEntry>,
}

/// One `{address, port, owner}` entry of a node list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub address: String,
    pub port: Option<u16>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Period between check cycles (e.g. "10m").
    pub check_interval: String,
    /// Upper bound for a single probe (e.g. "60s").
    pub probe_timeout: String,
    /// Delay before a sub-threshold failure is re-probed.
    pub retry_delay: String,
    /// Period of the nodes-in-error report; "0s" turns it off.
    pub report_interval: String,
    /// Size of the retry worker pool.
    pub retry_workers: usize,
    /// Consecutive failures before an alert fires.
    pub threshold: u32,
    /// Per node type overrides of `threshold`, keyed by node type.
    pub threshold_overrides: BTreeMap<String, u32>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: "10m".to_string(),
            probe_timeout: "60s".to_string(),
            retry_delay: "60s".to_string(),
            report_interval: "1h".to_string(),
            retry_workers: 50,
            threshold: 3,
            threshold_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    /// Listen address of the read-only status server.
    pub listen: String,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TorSettings {
    /// SOCKS5 proxy used for onion nodes (e.g. "127.0.0.1:9050").
    pub socks_proxy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub price_node: PriceProbeSettings,
    pub bitcoin_node: BitcoinProbeSettings,
    pub seed_node: SeedProbeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceProbeSettings {
    /// Exact body expected from `/getVersion`.
    pub expected_version: String,
    /// Key that must appear in the `/getFees` body.
    pub fee_key: String,
    /// Marker that must appear in the `/getAllMarketPrices` body.
    pub currency_marker: String,
}

impl Default for PriceProbeSettings {
    fn default() -> Self {
        Self {
            expected_version: "0.6.0".to_string(),
            fee_key: "btcTxFee".to_string(),
            currency_marker: "\"currencyCode\": \"BTC\"".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoinProbeSettings {
    /// Service bits the peer must advertise.
    pub expected_services: u64,
    /// Substring the peer's user agent must contain.
    pub subversion_pattern: String,
    /// Protocol version we announce in our own `version` message.
    pub protocol_version: i32,
}

impl Default for BitcoinProbeSettings {
    fn default() -> Self {
        Self {
            expected_services: 13,
            subversion_pattern: "0.15".to_string(),
            protocol_version: 70015,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedProbeSettings {
    /// Reachability script, invoked as `<script> <address>:<port>`.
    pub script: PathBuf,
}

impl Default for SeedProbeSettings {
    fn default() -> Self {
        Self {
            script: PathBuf::from("./scripts/seednodes.sh"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub price_node: Option<String>,
    pub seed_node: Option<String>,
    pub bitcoin_node: Option<String>,
    /// Channel for startup notices and the periodic report.
    pub monitor: Option<String>,
    /// Delivery timeout per webhook call.
    pub timeout: String,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            price_node: None,
            seed_node: None,
            bitcoin_node: None,
            monitor: None,
            timeout: "10s".to_string(),
        }
    }
}

impl AlertSettings {
    /// Webhook URL configured for a node type, if any.
    pub fn webhook_for(&self, node_type: NodeType) -> Option<&str> {
        let url = match node_type {
            NodeType::PriceNode => &self.price_node,
            NodeType::SeedNode => &self.seed_node,
            NodeType::BitcoinNode => &self.bitcoin_node,
        };
        url.as_deref().filter(|u| !u.trim().is_empty())
    }

    /// Webhook URL of the monitor channel, if any.
    pub fn monitor_webhook(&self) -> Option<&str> {
        self.monitor.as_deref().filter(|u| !u.trim().is_empty())
    }

    fn webhook_slot(&mut self, node_type: NodeType) -> &mut Option<String> {
        match node_type {
            NodeType::PriceNode => &mut self.price_node,
            NodeType::SeedNode => &mut self.seed_node,
            NodeType::BitcoinNode => &mut self.bitcoin_node,
        }
    }

    pub fn timeout(&self) -> ConfigResult<Duration> {
        duration_field("alerts.timeout", &self.timeout)
    }
}

/// Parsed durations of the `[monitor]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    pub retry_delay: Duration,
    /// Zero when periodic reports are off.
    pub report_interval: Duration,
}

impl MonitorTimings {
    /// Reports go out every this many cycles (at least one), or never.
    pub fn report_every_cycles(&self) -> Option<u64> {
        if self.report_interval.is_zero() || self.check_interval.is_zero() {
            return None;
        }
        let cycles = self.report_interval.as_millis() / self.check_interval.as_millis();
        Some(u64::try_from(cycles).unwrap_or(u64::MAX).max(1))
    }
}

impl MonitorSettings {
    pub fn timings(&self) -> ConfigResult<MonitorTimings> {
        Ok(MonitorTimings {
            check_interval: duration_field("monitor.check_interval", &self.check_interval)?,
            probe_timeout: duration_field("monitor.probe_timeout", &self.probe_timeout)?,
            retry_delay: duration_field("monitor.retry_delay", &self.retry_delay)?,
            report_interval: duration_field("monitor.report_interval", &self.report_interval)?,
        })
    }

    /// Resolved per node type thresholds (only the overridden types).
    pub fn threshold_overrides(&self) -> ConfigResult<BTreeMap<NodeType, u32>> {
        self.threshold_overrides
            .iter()
            .map(|(key, threshold)| {
                let node_type = key
                    .parse::<NodeType>()
                    .map_err(|e| ConfigError::Invalid(format!("monitor.threshold_overrides: {e}")))?;
                if *threshold == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "monitor.threshold_overrides.{key} must be at least 1"
                    )));
                }
                Ok((node_type, *threshold))
            })
            .collect()
    }
}

impl NodewatchConfig {
    /// Load, apply environment overrides, and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: NodewatchConfig = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        debug!(?path, nodes = config.node_count(), "config loaded");
        Ok(config)
    }

    /// Parse and validate a config document without touching the environment.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: NodewatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace webhook URLs with `NODEWATCH_WEBHOOK_<TYPE>` (and
    /// `NODEWATCH_WEBHOOK_MONITOR`) values when set.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for node_type in NodeType::ALL {
            let key = format!("{WEBHOOK_ENV_PREFIX}{}", node_type.key().to_uppercase());
            if let Some(url) = lookup(&key) {
                debug!(%node_type, "webhook taken from environment");
                *self.alerts.webhook_slot(node_type) = Some(url);
            }
        }
        if let Some(url) = lookup(&format!("{WEBHOOK_ENV_PREFIX}MONITOR")) {
            debug!("monitor webhook taken from environment");
            self.alerts.monitor = Some(url);
        }
    }

    fn entries(&self, node_type: NodeType) -> &[NodeEntry] {
        match node_type {
            NodeType::PriceNode => &self.price_nodes,
            NodeType::SeedNode => &self.seed_nodes,
            NodeType::BitcoinNode => &self.bitcoin_nodes,
        }
    }

    pub fn node_count(&self) -> usize {
        NodeType::ALL.iter().map(|t| self.entries(*t).len()).sum()
    }

    /// Descriptors in check order: node type first, then document order.
    pub fn node_descriptors(&self) -> Vec<NodeDescriptor> {
        NodeType::ALL
            .into_iter()
            .flat_map(|node_type| {
                self.entries(node_type).iter().map(move |entry| {
                    NodeDescriptor::new(
                        entry.address.trim(),
                        entry.port.unwrap_or_else(|| node_type.default_port()),
                        entry.owner.clone(),
                        node_type,
                    )
                })
            })
            .collect()
    }

    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        self.status
            .listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("status.listen {:?}: {e}", self.status.listen)))
    }

    pub fn socks_proxy(&self) -> ConfigResult<Option<SocketAddr>> {
        self.tor
            .socks_proxy
            .as_deref()
            .map(|proxy| {
                proxy
                    .parse()
                    .map_err(|e| ConfigError::Invalid(format!("tor.socks_proxy {proxy:?}: {e}")))
            })
            .transpose()
    }

    /// Check everything that can be checked before nodes are registered.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.node_count() == 0 {
            return Err(ConfigError::Invalid("no nodes configured".to_string()));
        }

        for node_type in NodeType::ALL {
            for entry in self.entries(node_type) {
                if entry.address.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("{node_type} entry with empty address")));
                }
                if entry.port == Some(0) {
                    return Err(ConfigError::Invalid(format!(
                        "{node_type} {} has port 0",
                        entry.address
                    )));
                }
            }
        }

        if self.monitor.threshold == 0 {
            return Err(ConfigError::Invalid("monitor.threshold must be at least 1".to_string()));
        }
        if self.monitor.retry_workers == 0 {
            return Err(ConfigError::Invalid("monitor.retry_workers must be at least 1".to_string()));
        }
        self.monitor.threshold_overrides()?;

        let timings = self.monitor.timings()?;
        if timings.check_interval.is_zero() || timings.probe_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "monitor.check_interval and monitor.probe_timeout must be non-zero".to_string(),
            ));
        }
        self.alerts.timeout()?;
        self.listen_addr()?;

        let has_onion = self
            .node_descriptors()
            .iter()
            .any(|d| d.transport == Transport::Onion);
        if has_onion && self.socks_proxy()?.is_none() {
            return Err(ConfigError::Invalid(
                "onion nodes configured but tor.socks_proxy is not set".to_string(),
            ));
        }

        Ok(())
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "10m", "1h".
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
