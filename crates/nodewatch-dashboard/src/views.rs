//! View types for the status surface.
//!
//! Built from a [`RegistrySnapshot`]; never touch live registry state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use nodewatch_state::{NodeSnapshot, RegistrySnapshot};

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// One report row, shared by the text and HTML renderings.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub node_type: &'static str,
    pub address: String,
    pub owner: String,
    pub in_error: bool,
    pub total_errors: u64,
    pub error_streak: u32,
    pub error_minutes: u64,
    /// Joined failure reasons; empty unless the node is in error.
    pub reasons: String,
}

impl NodeRow {
    pub fn from_snapshot(node: &NodeSnapshot) -> Self {
        let in_error = node.in_error();
        Self {
            node_type: node.descriptor.node_type.pretty_name(),
            address: node.descriptor.address.clone(),
            owner: node.descriptor.owner.clone().unwrap_or_default(),
            in_error,
            total_errors: node.health.total_failures_since_start(),
            error_streak: node.health.consecutive_unreported_failures(),
            error_minutes: node.health.total_error_minutes_since_start(),
            reasons: if in_error {
                node.health.reasons_joined()
            } else {
                String::new()
            },
        }
    }
}

/// Rows in report order.
pub fn rows(snapshot: &RegistrySnapshot) -> Vec<NodeRow> {
    snapshot
        .sorted()
        .into_iter()
        .map(NodeRow::from_snapshot)
        .collect()
}

// ── JSON ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub node_type: String,
    pub address: String,
    pub port: u16,
    pub owner: Option<String>,
    pub onion: bool,
    pub in_error: bool,
    pub consecutive_unreported_failures: u32,
    pub total_failures_since_start: u64,
    pub total_error_minutes_since_start: u64,
    pub last_failure: Option<String>,
    pub failure_reasons: Vec<String>,
}

impl NodeView {
    pub fn from_snapshot(node: &NodeSnapshot) -> Self {
        let d = &node.descriptor;
        let h = &node.health;
        Self {
            node_type: d.node_type.to_string(),
            address: d.address.clone(),
            port: d.port,
            owner: d.owner.clone(),
            onion: d.is_onion(),
            in_error: node.in_error(),
            consecutive_unreported_failures: h.consecutive_unreported_failures(),
            total_failures_since_start: h.total_failures_since_start(),
            total_error_minutes_since_start: h.total_error_minutes_since_start(),
            last_failure: h.last_failure().map(|at| at.to_rfc3339()),
            failure_reasons: h.distinct_failure_reasons().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeListView {
    pub started_at: String,
    pub taken_at: String,
    pub nodes_in_error: usize,
    pub nodes: Vec<NodeView>,
}

impl NodeListView {
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        Self {
            started_at: snapshot.started_at.to_rfc3339(),
            taken_at: snapshot.taken_at.to_rfc3339(),
            nodes_in_error: snapshot.error_count(),
            nodes: snapshot
                .sorted()
                .into_iter()
                .map(NodeView::from_snapshot)
                .collect(),
        }
    }
}
