//! nodewatch-core — shared types and configuration for nodewatch.
//!
//! Defines the immutable [`NodeDescriptor`] for every monitored node,
//! the probe and alert vocabularies ([`ProbeOutcome`], [`AlertEvent`]),
//! and the TOML configuration document the daemon is started from.

pub mod config;
pub mod error;
pub mod types;

pub use config::{MonitorTimings, NodewatchConfig, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
