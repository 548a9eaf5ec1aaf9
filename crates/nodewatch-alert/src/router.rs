//! Routes alert events to the sink configured for their node type.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nodewatch_core::{AlertEvent, NodeType, NodewatchConfig};

use crate::error::AlertResult;
use crate::message::AlertMessage;
use crate::sink::{AlertSink, LoggingAlertSink, WebhookAlertSink};

#[derive(Clone)]
pub struct AlertRouter {
    sinks: BTreeMap<NodeType, Arc<dyn AlertSink>>,
    fallback: Arc<dyn AlertSink>,
    monitor: Option<Arc<dyn AlertSink>>,
    check_interval: Duration,
}

/// Title of messages about the monitor itself.
pub const MONITOR_TITLE: &str = "Monitoring node";

impl AlertRouter {
    /// Every node type goes to `fallback` until given its own sink.
    pub fn new(fallback: Arc<dyn AlertSink>, check_interval: Duration) -> Self {
        Self {
            sinks: BTreeMap::new(),
            fallback,
            monitor: None,
            check_interval,
        }
    }

    pub fn with_sink(mut self, node_type: NodeType, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.insert(node_type, sink);
        self
    }

    /// Channel for startup notices and periodic reports.
    pub fn with_monitor_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.monitor = Some(sink);
        self
    }

    /// One webhook sink per configured `[alerts]` URL; the rest only log.
    pub fn from_config(config: &NodewatchConfig, check_interval: Duration) -> AlertResult<Self> {
        let timeout = config
            .alerts
            .timeout()
            .unwrap_or(Duration::from_secs(10));
        let mut router = Self::new(Arc::new(LoggingAlertSink), check_interval);
        for node_type in NodeType::ALL {
            if let Some(url) = config.alerts.webhook_for(node_type) {
                router = router.with_sink(node_type, Arc::new(WebhookAlertSink::new(url, timeout)?));
                debug!(%node_type, "webhook alerts enabled");
            }
        }
        if let Some(url) = config.alerts.monitor_webhook() {
            router = router.with_monitor_sink(Arc::new(WebhookAlertSink::new(url, timeout)?));
            debug!("monitor webhook enabled");
        }
        Ok(router)
    }

    pub fn sink_for(&self, node_type: NodeType) -> &Arc<dyn AlertSink> {
        self.sinks.get(&node_type).unwrap_or(&self.fallback)
    }

    pub fn monitor_sink(&self) -> &Arc<dyn AlertSink> {
        self.monitor.as_ref().unwrap_or(&self.fallback)
    }

    /// Send a message about the monitor itself (startup, reports) to the
    /// monitor channel, in the background.
    pub fn notify_monitor(&self, body: String) -> JoinHandle<()> {
        info!(lines = body.lines().count(), "sending monitor message");
        let sink = Arc::clone(self.monitor_sink());
        tokio::spawn(async move {
            if let Err(e) = sink.send(MONITOR_TITLE, &body).await {
                warn!(sink = sink.name(), error = %e, "monitor message delivery failed");
            }
        })
    }

    /// Deliver in the background. Failures are logged, never retried.
    pub fn dispatch(&self, event: &AlertEvent) -> JoinHandle<()> {
        let message = AlertMessage::from_event(event, self.check_interval);
        let node_type = event.node_type();
        let address = event.address().to_string();
        if event.is_raise() {
            warn!(%node_type, %address, title = %message.title, body = %message.body, "raising alert");
        } else {
            info!(%node_type, %address, title = %message.title, "clearing alert");
        }

        let sink = Arc::clone(self.sink_for(node_type));
        tokio::spawn(async move {
            if let Err(e) = sink.send(&message.title, &message.body).await {
                warn!(
                    sink = sink.name(),
                    %node_type,
                    %address,
                    error = %e,
                    "alert delivery failed"
                );
            }
        })
    }
}
