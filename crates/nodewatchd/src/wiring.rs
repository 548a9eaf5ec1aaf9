//! Builds the monitor's components from a loaded configuration.
//!
//! Everything that can fail on bad configuration fails here, before any
//! probe runs. The status port is bound here too, before the check loop
//! starts.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use nodewatch_alert::{AlertError, AlertRouter};
use nodewatch_core::{ConfigError, MonitorTimings, NodeType, NodewatchConfig};
use nodewatch_dashboard::ReportGenerator;
use nodewatch_health::{EscalationPolicy, PolicyTable, ProbeOrchestrator, RetryScheduler};
use nodewatch_probe::ProbeTable;
use nodewatch_state::{NodeRegistry, RegistryError};

/// Startup failures. All of them end the process with exit status 2.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid node list: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid alert settings: {0}")]
    Alerts(#[from] AlertError),

    #[error("cannot bind status server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Fully validated pieces, not yet running.
pub struct Components {
    pub registry: Arc<NodeRegistry>,
    pub policy: PolicyTable,
    pub probes: ProbeTable,
    pub alerts: AlertRouter,
    pub timings: MonitorTimings,
    pub retry_workers: usize,
    pub listen: SocketAddr,
}

impl Components {
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let config = NodewatchConfig::from_file(path)?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &NodewatchConfig) -> Result<Self, StartupError> {
        let timings = config.monitor.timings()?;
        let registry = NodeRegistry::from_descriptors(config.node_descriptors())?;
        let policy = PolicyTable::from_settings(&config.monitor)?;
        let probes = ProbeTable::from_config(config)?;
        let alerts = AlertRouter::from_config(config, timings.check_interval)?;

        for node_type in NodeType::ALL {
            let count = registry.nodes_of_type(node_type).count();
            if count > 0 {
                info!(
                    %node_type,
                    nodes = count,
                    threshold = policy.threshold(node_type),
                    "nodes registered"
                );
            }
        }

        Ok(Self {
            registry: Arc::new(registry),
            policy,
            probes,
            alerts,
            timings,
            retry_workers: config.monitor.retry_workers,
            listen: config.listen_addr()?,
        })
    }

    /// Bind the status server's listening socket.
    pub async fn bind_status(&self) -> Result<TcpListener, StartupError> {
        TcpListener::bind(self.listen)
            .await
            .map_err(|source| StartupError::Bind {
                addr: self.listen,
                source,
            })
    }

    /// Start the retry pool and assemble the orchestrator.
    ///
    /// Must be called from inside the runtime.
    pub fn orchestrator(&self) -> Arc<ProbeOrchestrator> {
        Arc::new(
            ProbeOrchestrator::new(
                Arc::clone(&self.registry),
                EscalationPolicy::new(self.policy.clone()),
                self.probes.clone(),
                self.alerts.clone(),
                RetryScheduler::start(self.retry_workers),
                self.timings,
            )
            .with_report(ReportGenerator::render_text),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const CONFIG: &str = r#"
[monitor]
check_interval = "10m"
retry_workers = 4

[monitor.threshold_overrides]
seed_node = 2

[status]
listen = "127.0.0.1:0"

[[price_nodes]]
address = "price.example.org"
owner = "alice"

[[seed_nodes]]
address = "seed.example.org"
port = 8000

[[bitcoin_nodes]]
address = "1.2.3.4"
"#;

    #[test]
    fn builds_components_from_config() {
        let config = NodewatchConfig::from_toml_str(CONFIG).unwrap();
        let components = Components::from_config(&config).unwrap();

        assert_eq!(components.registry.len(), 3);
        assert_eq!(components.policy.threshold(NodeType::SeedNode), 2);
        assert_eq!(components.policy.threshold(NodeType::BitcoinNode), 3);
        assert_eq!(components.timings.check_interval, Duration::from_secs(600));
        assert_eq!(components.retry_workers, 4);
        assert!(components.probes.get(NodeType::BitcoinNode).is_some());
    }

    #[test]
    fn duplicate_address_is_a_startup_error() {
        let config = NodewatchConfig::from_toml_str(
            r#"
[[seed_nodes]]
address = "1.2.3.4"
port = 8000

[[bitcoin_nodes]]
address = "1.2.3.4"
"#,
        )
        .unwrap();

        let err = Components::from_config(&config).err().unwrap();
        assert!(matches!(
            err,
            StartupError::Registry(RegistryError::DuplicateNode(ref address)) if address == "1.2.3.4"
        ));
    }

    #[test]
    fn bad_webhook_url_is_a_startup_error() {
        let mut config = NodewatchConfig::from_toml_str(CONFIG).unwrap();
        config.alerts.bitcoin_node = Some("not a url".to_string());
        let err = Components::from_config(&config).err().unwrap();
        assert!(matches!(err, StartupError::Alerts(_)));
    }

    #[test]
    fn load_reads_file_and_reports_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        assert!(Components::load(file.path()).is_ok());

        let err = Components::load(Path::new("/nonexistent/nodewatch.toml")).err().unwrap();
        assert!(matches!(err, StartupError::Config(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn orchestrator_shares_the_registry() {
        let config = NodewatchConfig::from_toml_str(CONFIG).unwrap();
        let components = Components::from_config(&config).unwrap();
        let orchestrator = components.orchestrator();
        assert!(Arc::ptr_eq(orchestrator.registry(), &components.registry));
        orchestrator.retries().shutdown().await;
    }

    #[tokio::test]
    async fn occupied_status_port_is_a_startup_error() {
        let config = NodewatchConfig::from_toml_str(CONFIG).unwrap();
        let mut components = Components::from_config(&config).unwrap();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        components.listen = taken.local_addr().unwrap();

        let err = components.bind_status().await.err().unwrap();
        assert!(matches!(err, StartupError::Bind { addr, .. } if addr == components.listen));
    }

    #[tokio::test]
    async fn free_status_port_binds() {
        let config = NodewatchConfig::from_toml_str(CONFIG).unwrap();
        let components = Components::from_config(&config).unwrap();
        let listener = components.bind_status().await.unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }
}
