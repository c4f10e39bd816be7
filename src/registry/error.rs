//! Error types for the node registry.

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::topology_store::TopologyStoreError;

/// Errors raised by registry operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when a required input is blank or malformed.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Name of the offending input.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Raised when a node or NFS server with the same name is registered.
    #[error("{name} already exists")]
    AlreadyExists {
        /// Conflicting name.
        name: String,
    },
    /// Raised when the named node is not registered.
    #[error("node {name} not found")]
    NodeNotFound {
        /// Requested node name.
        name: String,
    },
    /// Raised when the named NFS server is not registered.
    #[error("NFS server {name} not found")]
    NfsServerNotFound {
        /// Requested server name.
        name: String,
    },
    /// Raised when the SSH key cannot be stored or removed.
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// Raised when the topology document cannot be loaded or saved.
    #[error(transparent)]
    Persistence(#[from] TopologyStoreError),
}

impl RegistryError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}
