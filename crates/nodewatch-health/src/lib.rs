//! nodewatch-health — the decision engine.
//!
//! ```text
//! ProbeOrchestrator (one cycle per check interval)
//!   ├── Probe per node type → ProbeOutcome
//!   ├── EscalationPolicy (under the node's lock in NodeRegistry)
//!   │     └── Decision: Healthy | Recovered | Cleared | Retry | Raise | Suppressed
//!   ├── Retry  → RetryScheduler (bounded worker pool, single delayed re-probe)
//!   └── Raise / Cleared → AlertRouter (fire and forget)
//! ```
//!
//! Failures below the threshold are retried, never alerted. Once a node is
//! escalated further failures accumulate silently until it recovers.

pub mod error;
pub mod escalation;
pub mod orchestrator;
pub mod retry;

pub use error::{HealthError, HealthResult};
pub use escalation::{DEFAULT_THRESHOLD, Decision, EscalationPolicy, PolicyTable};
pub use orchestrator::{BoxFuture, CycleSummary, ProbeOrchestrator, ReportRenderer};
pub use retry::{DEFAULT_WORKERS, RetryAction, RetryScheduler};
