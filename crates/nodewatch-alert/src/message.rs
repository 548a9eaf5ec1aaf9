//! Human-readable alert text.

use std::time::Duration;

use nodewatch_core::AlertEvent;

/// Title and body handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
}

impl AlertMessage {
    /// Render an event. `check_interval` feeds the "next check in" hint.
    pub fn from_event(event: &AlertEvent, check_interval: Duration) -> Self {
        match event {
            AlertEvent::Raise {
                node_type,
                address,
                owner,
                reason,
                failures,
                aggregate_error_count,
            } => Self {
                title: format!(
                    "Error: {} {address} failed {failures} times",
                    node_type.pretty_name()
                ),
                body: format!(
                    "<{}> {reason}{}",
                    owner_label(owner),
                    error_summary(*aggregate_error_count, check_interval)
                ),
            },
            AlertEvent::Clear {
                node_type,
                address,
                owner,
                aggregate_error_count,
            } => Self {
                title: format!(
                    "Fixed: {} {address} ({})",
                    node_type.pretty_name(),
                    owner_label(owner)
                ),
                body: format!(
                    "No longer in error{}",
                    error_summary(*aggregate_error_count, check_interval)
                ),
            },
        }
    }
}

fn owner_label(owner: &Option<String>) -> &str {
    owner.as_deref().unwrap_or("unknown owner")
}

fn error_summary(errors: usize, check_interval: Duration) -> String {
    format!(
        " (now {errors} node(s) have errors, next check in +/-{} minutes)",
        check_interval.as_secs() / 60
    )
}
