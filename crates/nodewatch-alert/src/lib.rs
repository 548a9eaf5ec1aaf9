//! Alert delivery.
//!
//! Escalation emits [`AlertEvent`](nodewatch_core::AlertEvent)s; the
//! [`AlertRouter`] renders them and hands them to the sink configured for the
//! node type. Delivery is best effort.

pub mod error;
pub mod message;
pub mod router;
pub mod sink;

pub use error::{AlertError, AlertResult};
pub use message::AlertMessage;
pub use router::{AlertRouter, MONITOR_TITLE};
pub use sink::{AlertSink, LoggingAlertSink, WebhookAlertSink};
