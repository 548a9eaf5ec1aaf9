//! Error types for the node registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A second node with the same address was registered.
    #[error("duplicate node address: {0}")]
    DuplicateNode(String),

    /// Lookup of an address that was never registered.
    #[error("node not found: {0}")]
    NodeNotFound(String),
}
