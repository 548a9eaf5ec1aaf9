//! nodewatch-state — in-memory node registry for nodewatch.
//!
//! Holds the fixed set of monitored nodes loaded at startup together with
//! one [`NodeHealthState`] per node. Nothing is persisted; state resets on
//! restart.
//!
//! # Concurrency
//!
//! Each node's health state sits behind its own lock, so probes on
//! different nodes never contend and two transitions for the same node
//! never interleave. Readers take a [`RegistrySnapshot`], a deep copy
//! built one node at a time, so reporting never waits on a probe.

pub mod error;
pub mod health;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use health::{NodeHealthState, Recovery};
pub use registry::{NodeRegistry, NodeSnapshot, RegistrySnapshot};
