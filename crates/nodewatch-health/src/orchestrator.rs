//! Probe orchestrator: drives check cycles over the registry.
//!
//! One cycle walks every node type in order and probes that type's nodes
//! one at a time. Each outcome goes through the escalation policy under the
//! node's lock; the resulting decision schedules a retry or dispatches an
//! alert. Retries re-enter through [`ProbeOrchestrator::check_node`], the
//! same path a cycle uses.
//!
//! With a report renderer attached, `run` also posts the nodes-in-error
//! report to the monitor channel every `report_interval` worth of cycles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use nodewatch_alert::AlertRouter;
use nodewatch_core::{MonitorTimings, NodeDescriptor, NodeType, ProbeOutcome};
use nodewatch_probe::ProbeTable;
use nodewatch_state::{NodeRegistry, RegistrySnapshot};

use crate::error::HealthResult;
use crate::escalation::{Decision, EscalationPolicy};
use crate::retry::RetryScheduler;

/// Boxed future used where a check re-enters itself through a retry.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Renders the periodic report. An empty string means nothing to send.
pub type ReportRenderer = fn(&RegistrySnapshot) -> String;

/// Extra time a probe gets beyond its own timeout before it is abandoned.
const PROBE_GRACE: Duration = Duration::from_secs(5);

/// Counts for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub probed: usize,
    pub failed: usize,
    pub raised: usize,
    pub cleared: usize,
    /// Nodes escalated when the cycle ended.
    pub escalated: usize,
    /// The cycle stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl CycleSummary {
    fn record(&mut self, decision: &Decision) {
        self.probed += 1;
        if decision.is_failure() {
            self.failed += 1;
        }
        match decision {
            Decision::Raise { .. } => self.raised += 1,
            Decision::Cleared { .. } => self.cleared += 1,
            _ => {}
        }
    }
}

/// Clears the running flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ProbeOrchestrator {
    registry: Arc<NodeRegistry>,
    policy: EscalationPolicy,
    probes: ProbeTable,
    alerts: AlertRouter,
    retries: RetryScheduler,
    timings: MonitorTimings,
    report: Option<ReportRenderer>,
    running: AtomicBool,
    stopping: AtomicBool,
}

impl ProbeOrchestrator {
    pub fn new(
        registry: Arc<NodeRegistry>,
        policy: EscalationPolicy,
        probes: ProbeTable,
        alerts: AlertRouter,
        retries: RetryScheduler,
        timings: MonitorTimings,
    ) -> Self {
        Self {
            registry,
            policy,
            probes,
            alerts,
            retries,
            timings,
            report: None,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Post `render`'s output to the monitor channel from `run`.
    pub fn with_report(mut self, render: ReportRenderer) -> Self {
        self.report = Some(render);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    /// Ask a running cycle to stop after the node it is probing.
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one full check cycle (Idle → Running → Idle).
    ///
    /// Returns `None` without probing anything if a cycle is already running.
    pub async fn run_cycle(self: &Arc<Self>) -> Option<CycleSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous check cycle still running, skipping");
            return None;
        }
        let _guard = CycleGuard(&self.running);

        let mut summary = CycleSummary::default();
        'types: for node_type in NodeType::ALL {
            let addresses: Vec<String> = self
                .registry
                .nodes_of_type(node_type)
                .map(|n| n.address.clone())
                .collect();
            if addresses.is_empty() {
                continue;
            }
            debug!(%node_type, nodes = addresses.len(), "checking node type");

            for address in addresses {
                if self.stopping.load(Ordering::SeqCst) {
                    summary.interrupted = true;
                    break 'types;
                }
                match Arc::clone(self).check_node(address).await {
                    Ok(decision) => summary.record(&decision),
                    Err(e) => error!(%node_type, error = %e, "node check failed"),
                }
            }
        }

        summary.escalated = self.registry.escalated_count();
        Some(summary)
    }

    /// Probe one node and apply the outcome.
    ///
    /// Used by cycles and by retries alike.
    pub fn check_node(self: Arc<Self>, address: String) -> BoxFuture<HealthResult<Decision>> {
        Box::pin(async move {
            let node = self.registry.descriptor(&address)?.clone();
            let outcome = self.probe_node(&node).await;
            self.apply(&node, outcome)
        })
    }

    /// Run the probe for `node`, turning every kind of failure (error,
    /// panic, overrun) into a `Failure` outcome.
    async fn probe_node(&self, node: &NodeDescriptor) -> ProbeOutcome {
        let Some(probe) = self.probes.get(node.node_type).cloned() else {
            return ProbeOutcome::failure(format!("no probe configured for {}", node.node_type));
        };

        let timeout = self.timings.probe_timeout;
        let target = node.clone();
        let mut task = tokio::spawn(async move { probe.probe(&target, timeout).await });

        match tokio::time::timeout(timeout + PROBE_GRACE, &mut task).await {
            Ok(Ok(result)) => nodewatch_probe::outcome(result),
            Ok(Err(e)) => {
                error!(address = %node.address, error = %e, "probe task failed");
                ProbeOutcome::failure(format!("probe aborted: {e}"))
            }
            Err(_) => {
                task.abort();
                ProbeOutcome::failure("Timeout")
            }
        }
    }

    /// Feed an outcome through the policy and act on the decision.
    pub fn apply(self: &Arc<Self>, node: &NodeDescriptor, outcome: ProbeOutcome) -> HealthResult<Decision> {
        let now = Utc::now();
        let (decision, aggregate) = self
            .registry
            .update_counted(&node.address, |descriptor, state| {
                self.policy.evaluate(descriptor, state, &outcome, now)
            })?;

        match &decision {
            Decision::Healthy => {
                debug!(address = %node.address, node_type = %node.node_type, "ok");
            }
            Decision::Recovered { failures } => {
                info!(
                    address = %node.address,
                    node_type = %node.node_type,
                    failures,
                    "recovered before alerting"
                );
            }
            Decision::Cleared { .. } | Decision::Raise { .. } => {
                if let Some(event) = decision.alert_event(node, aggregate) {
                    self.alerts.dispatch(&event);
                }
            }
            Decision::Retry { failures } => {
                let this = Arc::clone(self);
                let address = node.address.clone();
                let failures = *failures;
                let retry = Box::pin(async move {
                    info!(%address, failures, "retrying");
                    if let Err(e) = this.check_node(address).await {
                        error!(error = %e, "retry check failed");
                    }
                });
                self.retries
                    .schedule_retry(node, self.timings.retry_delay, retry);
            }
            Decision::Suppressed { failures } => {
                debug!(address = %node.address, failures, "still failing, alert already raised");
            }
        }
        Ok(decision)
    }

    /// Render the report and post it to the monitor channel unless it is
    /// empty. Returns whether anything was sent.
    pub fn send_report(&self) -> bool {
        let Some(render) = self.report else {
            return false;
        };
        let report = render(&self.registry.all_nodes());
        if report.is_empty() {
            debug!("no nodes in error, report skipped");
            return false;
        }
        self.alerts.notify_monitor(report);
        true
    }

    /// Periodic driver: cycle, sleep, repeat until `shutdown` flips to true,
    /// then drain pending retries.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, startup_delay: Duration) {
        // Interrupt a cycle in flight as soon as shutdown is requested.
        let stopper = {
            let this = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                this.request_stop();
            })
        };

        if !startup_delay.is_zero() {
            info!(delay = ?startup_delay, "waiting before first check cycle");
            if sleep_or_stop(startup_delay, &mut shutdown).await {
                stopper.abort();
                self.retries.shutdown().await;
                return;
            }
        }

        info!(
            nodes = self.registry.len(),
            interval = ?self.timings.check_interval,
            "probe orchestrator started"
        );

        let report_every = self.report.and(self.timings.report_every_cycles());
        if report_every.is_some() {
            self.alerts.notify_monitor(format!(
                "Startup. Nodes in error are reported every {} minutes, starting after the first check.",
                self.timings.report_interval.as_secs() / 60
            ));
        }

        let mut completed: u64 = 0;
        loop {
            info!("check cycle started");
            if let Some(summary) = self.run_cycle().await {
                info!(
                    probed = summary.probed,
                    failed = summary.failed,
                    raised = summary.raised,
                    cleared = summary.cleared,
                    escalated = summary.escalated,
                    interrupted = summary.interrupted,
                    "check cycle finished"
                );
                if report_every.is_some_and(|every| completed % every == 0) {
                    self.send_report();
                }
                completed += 1;
            }

            if sleep_or_stop(self.timings.check_interval, &mut shutdown).await {
                break;
            }
        }

        stopper.abort();
        self.retries.shutdown().await;
        info!("probe orchestrator stopped");
    }
}

/// Sleep for `duration`; returns `true` if shutdown was requested first (or
/// the shutdown sender is gone).
async fn sleep_or_stop(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.wait_for(|stop| *stop) => true,
    }
}
