//! Escalation policy: turns probe outcomes into state transitions and
//! alert decisions.
//!
//! A failing node is retried until its streak reaches the threshold for its
//! node type. Exactly one raise fires per threshold crossing and exactly one
//! clear per recovery from an escalated streak; everything in between is
//! silent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use nodewatch_core::config::MonitorSettings;
use nodewatch_core::{AlertEvent, ConfigResult, NodeDescriptor, NodeType, ProbeOutcome, normalize_reason};
use nodewatch_state::NodeHealthState;

/// Default consecutive failures before an alert.
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Escalation threshold per node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    default_threshold: u32,
    overrides: BTreeMap<NodeType, u32>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl PolicyTable {
    /// Thresholds below 1 are raised to 1 ("alert on first failure").
    pub fn new(default_threshold: u32) -> Self {
        Self {
            default_threshold: default_threshold.max(1),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, node_type: NodeType, threshold: u32) -> Self {
        self.overrides.insert(node_type, threshold.max(1));
        self
    }

    pub fn from_settings(settings: &MonitorSettings) -> ConfigResult<Self> {
        let table = settings
            .threshold_overrides()?
            .into_iter()
            .fold(Self::new(settings.threshold), |table, (node_type, n)| {
                table.with_override(node_type, n)
            });
        Ok(table)
    }

    pub fn threshold(&self, node_type: NodeType) -> u32 {
        self.overrides
            .get(&node_type)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

/// What one probe outcome did to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Success on a node that was not failing. Nothing changed.
    Healthy,
    /// Success ending a streak that never reached the threshold.
    Recovered { failures: u32 },
    /// Success ending an escalated streak: a clear must fire.
    Cleared { failures: u32 },
    /// Failure below the threshold: re-probe after the retry delay.
    Retry { failures: u32 },
    /// Failure reaching the threshold: a raise must fire.
    Raise { reason: String, failures: u32 },
    /// Failure on an already escalated node. Recorded, not alerted.
    Suppressed { failures: u32 },
}

impl Decision {
    /// The alert this decision calls for, if any. `aggregate_error_count`
    /// is the number of escalated nodes after the transition.
    pub fn alert_event(
        &self,
        node: &NodeDescriptor,
        aggregate_error_count: usize,
    ) -> Option<AlertEvent> {
        match self {
            Decision::Raise { reason, failures } => Some(AlertEvent::Raise {
                node_type: node.node_type,
                address: node.address.clone(),
                owner: node.owner.clone(),
                reason: reason.clone(),
                failures: *failures,
                aggregate_error_count,
            }),
            Decision::Cleared { .. } => Some(AlertEvent::Clear {
                node_type: node.node_type,
                address: node.address.clone(),
                owner: node.owner.clone(),
                aggregate_error_count,
            }),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Decision::Retry { .. } | Decision::Raise { .. } | Decision::Suppressed { .. }
        )
    }
}

/// Pure decision logic over one node's health state.
#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    table: PolicyTable,
}

impl EscalationPolicy {
    pub fn new(table: PolicyTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    /// Apply `outcome` to `state` at `now`.
    ///
    /// Callers must hold the node's lock for the whole call so transitions
    /// for one node never interleave.
    pub fn evaluate(
        &self,
        node: &NodeDescriptor,
        state: &mut NodeHealthState,
        outcome: &ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Decision {
        match outcome {
            ProbeOutcome::Success => match state.record_recovery(now) {
                None => Decision::Healthy,
                Some(recovery) if recovery.was_escalated => Decision::Cleared {
                    failures: recovery.failures,
                },
                Some(recovery) => Decision::Recovered {
                    failures: recovery.failures,
                },
            },
            ProbeOutcome::Failure(reason) => {
                let failures = state.record_failure(reason, now);
                let threshold = self.table.threshold(node.node_type);
                debug!(
                    address = %node.address,
                    failures,
                    threshold,
                    reason = %reason,
                    "probe failed"
                );

                if state.is_escalated() {
                    Decision::Suppressed { failures }
                } else if failures >= threshold {
                    state.escalate();
                    Decision::Raise {
                        reason: normalize_reason(reason).to_string(),
                        failures,
                    }
                } else {
                    Decision::Retry { failures }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn node(node_type: NodeType) -> NodeDescriptor {
        NodeDescriptor::new("10.0.0.1", 8333, Some("alice".into()), node_type)
    }

    fn t(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::minutes(minutes)
    }

    fn fail(reason: &str) -> ProbeOutcome {
        ProbeOutcome::failure(reason)
    }

    #[test]
    fn below_threshold_only_retries() {
        let policy = EscalationPolicy::default();
        let node = node(NodeType::BitcoinNode);
        let mut state = NodeHealthState::new();

        for k in 1..DEFAULT_THRESHOLD {
            let decision = policy.evaluate(&node, &mut state, &fail("timeout"), t(k as i64));
            assert_eq!(decision, Decision::Retry { failures: k });
            assert!(!state.is_escalated());
        }
    }

    #[test]
    fn raise_fires_once_per_crossing() {
        let policy = EscalationPolicy::default();
        let node = node(NodeType::SeedNode);
        let mut state = NodeHealthState::new();

        let decisions: Vec<Decision> = (0..6)
            .map(|i| policy.evaluate(&node, &mut state, &fail("timeout"), t(i)))
            .collect();

        let raises = decisions
            .iter()
            .filter(|d| matches!(d, Decision::Raise { .. }))
            .count();
        assert_eq!(raises, 1);
        assert_eq!(
            decisions[2],
            Decision::Raise {
                reason: "timeout".to_string(),
                failures: 3
            }
        );
        assert_eq!(decisions[5], Decision::Suppressed { failures: 6 });
    }

    #[test]
    fn recovery_after_escalation_clears_once() {
        let policy = EscalationPolicy::default();
        let node = node(NodeType::PriceNode);
        let mut state = NodeHealthState::new();
        for i in 0..3 {
            policy.evaluate(&node, &mut state, &fail("timeout"), t(i));
        }

        let decision = policy.evaluate(&node, &mut state, &ProbeOutcome::Success, t(3));
        assert_eq!(decision, Decision::Cleared { failures: 3 });
        assert_eq!(state.consecutive_unreported_failures(), 0);
        assert!(state.distinct_failure_reasons().is_empty());

        // A second success is a no-op.
        let before = state.clone();
        let decision = policy.evaluate(&node, &mut state, &ProbeOutcome::Success, t(4));
        assert_eq!(decision, Decision::Healthy);
        assert_eq!(state, before);
    }

    #[test]
    fn recovery_below_threshold_is_silent() {
        let policy = EscalationPolicy::default();
        let node = node(NodeType::BitcoinNode);
        let mut state = NodeHealthState::new();
        policy.evaluate(&node, &mut state, &fail("timeout"), t(0));

        let decision = policy.evaluate(&node, &mut state, &ProbeOutcome::Success, t(1));
        assert_eq!(decision, Decision::Recovered { failures: 1 });
        assert!(decision.alert_event(&node, 0).is_none());
    }

    #[test]
    fn per_type_override_applies_only_to_that_type() {
        let policy = EscalationPolicy::new(PolicyTable::new(3).with_override(NodeType::PriceNode, 1));
        let mut price_state = NodeHealthState::new();
        let mut seed_state = NodeHealthState::new();

        let price = policy.evaluate(&node(NodeType::PriceNode), &mut price_state, &fail("x"), t(0));
        let seed = policy.evaluate(&node(NodeType::SeedNode), &mut seed_state, &fail("x"), t(0));

        assert!(matches!(price, Decision::Raise { failures: 1, .. }));
        assert_eq!(seed, Decision::Retry { failures: 1 });
    }

    #[test]
    fn zero_threshold_means_first_failure() {
        let table = PolicyTable::new(0);
        assert_eq!(table.threshold(NodeType::SeedNode), 1);
    }

    #[test]
    fn empty_reason_is_normalized_in_raise() {
        let policy = EscalationPolicy::new(PolicyTable::new(1));
        let mut state = NodeHealthState::new();
        let decision = policy.evaluate(&node(NodeType::SeedNode), &mut state, &fail(""), t(0));
        assert_eq!(
            decision,
            Decision::Raise {
                reason: "Empty reason".to_string(),
                failures: 1
            }
        );
    }

    #[test]
    fn raise_event_carries_node_and_count() {
        let node = node(NodeType::BitcoinNode);
        let decision = Decision::Raise {
            reason: "timeout".to_string(),
            failures: 3,
        };
        assert_eq!(
            decision.alert_event(&node, 4),
            Some(AlertEvent::Raise {
                node_type: NodeType::BitcoinNode,
                address: "10.0.0.1".to_string(),
                owner: Some("alice".to_string()),
                reason: "timeout".to_string(),
                failures: 3,
                aggregate_error_count: 4,
            })
        );
    }

    #[test]
    fn table_from_settings_resolves_overrides() {
        let mut settings = MonitorSettings::default();
        settings.threshold = 4;
        settings
            .threshold_overrides
            .insert("bitcoin_node".to_string(), 2);

        let table = PolicyTable::from_settings(&settings).unwrap();
        assert_eq!(table.threshold(NodeType::BitcoinNode), 2);
        assert_eq!(table.threshold(NodeType::PriceNode), 4);
    }

    #[test]
    fn error_minutes_accumulate_across_streak() {
        let policy = EscalationPolicy::default();
        let node = node(NodeType::BitcoinNode);
        let mut state = NodeHealthState::new();

        for minute in [0, 10, 20, 30] {
            policy.evaluate(&node, &mut state, &fail("timeout"), t(minute));
        }
        policy.evaluate(&node, &mut state, &ProbeOutcome::Success, t(41));
        assert_eq!(state.total_error_minutes_since_start(), 41);
    }
}
