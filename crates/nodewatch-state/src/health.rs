//! Per-node health bookkeeping.
//!
//! [`NodeHealthState`] only records facts (failures, recoveries, escalation).
//! Deciding when a failure streak deserves an alert is the escalation
//! policy's job.

use std::time::Duration;

use chrono::{DateTime, Utc};

use nodewatch_core::normalize_reason;

/// Mutable health record of one node.
///
/// Invariant: `last_failure` is set iff the node is in a failing streak,
/// i.e. `consecutive_unreported_failures > 0 || escalated`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeHealthState {
    consecutive_unreported_failures: u32,
    total_failures_since_start: u64,
    /// Exact time spent failing; reported minutes are derived from it.
    error_time: Duration,
    last_failure: Option<DateTime<Utc>>,
    /// Distinct reasons of the current streak, in first-seen order.
    distinct_failure_reasons: Vec<String>,
    escalated: bool,
}

/// What a recovery cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    /// An alert had been raised for the streak that just ended.
    pub was_escalated: bool,
    /// Failures in the streak that just ended.
    pub failures: u32,
}

impl NodeHealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failed probe at `now`. Returns the new streak length.
    pub fn record_failure(&mut self, reason: &str, now: DateTime<Utc>) -> u32 {
        let reason = normalize_reason(reason);
        if !self.distinct_failure_reasons.iter().any(|r| r == reason) {
            self.distinct_failure_reasons.push(reason.to_string());
        }
        self.total_failures_since_start += 1;

        if let Some(since) = self.last_failure {
            self.error_time += elapsed(since, now);
        }
        self.last_failure = Some(now);

        self.consecutive_unreported_failures = self.consecutive_unreported_failures.saturating_add(1);
        self.consecutive_unreported_failures
    }

    /// Record a successful probe at `now`.
    ///
    /// Returns `None` when the node was already healthy (nothing changes).
    pub fn record_recovery(&mut self, now: DateTime<Utc>) -> Option<Recovery> {
        let since = self.last_failure.take()?;
        self.error_time += elapsed(since, now);

        let recovery = Recovery {
            was_escalated: self.escalated,
            failures: self.consecutive_unreported_failures,
        };
        self.distinct_failure_reasons.clear();
        self.consecutive_unreported_failures = 0;
        self.escalated = false;
        Some(recovery)
    }

    /// Mark the current streak as alerted.
    pub fn escalate(&mut self) {
        self.escalated = true;
    }

    pub fn consecutive_unreported_failures(&self) -> u32 {
        self.consecutive_unreported_failures
    }

    pub fn total_failures_since_start(&self) -> u64 {
        self.total_failures_since_start
    }

    /// Whole minutes spent failing since startup.
    pub fn total_error_minutes_since_start(&self) -> u64 {
        self.error_time.as_secs() / 60
    }

    pub fn total_error_time(&self) -> Duration {
        self.error_time
    }

    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.last_failure
    }

    pub fn distinct_failure_reasons(&self) -> &[String] {
        &self.distinct_failure_reasons
    }

    /// Reasons joined with `" | "`.
    pub fn reasons_joined(&self) -> String {
        self.distinct_failure_reasons.join(" | ")
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated
    }

    /// In a failing streak, alerted or not.
    pub fn is_failing(&self) -> bool {
        self.last_failure.is_some()
    }

    pub fn is_healthy(&self) -> bool {
        !self.is_failing()
    }
}

/// Elapsed wall time; a clock stepping backwards counts as zero.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
