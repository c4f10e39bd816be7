//! Persistence of the cluster topology document.
//!
//! Every registry operation is a full read-modify-write cycle through a
//! [`TopologyStore`]. The file-backed store writes through a temporary file
//! and an atomic rename, so a crash mid-write leaves the previous document in
//! place. There is no inter-process lock: two concurrent writers race and the
//! last one wins. Callers that need mutual exclusion should wrap a store
//! rather than change the registry.

use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::files;
use crate::topology::ClusterTopology;

/// File name of the topology document inside the configuration directory.
pub const TOPOLOGY_FILE_NAME: &str = "cluster.yaml";

/// Errors raised while loading or persisting the topology document.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TopologyStoreError {
    /// Raised when the document exists but cannot be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the document is not a valid topology.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that held invalid content.
        path: Utf8PathBuf,
        /// Parser error string.
        message: String,
    },
    /// Raised when the in-memory topology cannot be rendered.
    #[error("failed to serialise topology for {path}: {message}")]
    Serialize {
        /// Destination path.
        path: Utf8PathBuf,
        /// Serialiser error string.
        message: String,
    },
    /// Raised when writing or replacing the document fails.
    #[error("failed to persist {path}: {message}")]
    Persist {
        /// Destination path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Narrow load/persist interface over the topology document.
pub trait TopologyStore {
    /// Loads the current document, or a fresh empty topology when none has
    /// been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyStoreError`] when an existing document cannot be
    /// read or parsed.
    fn load(&self) -> Result<ClusterTopology, TopologyStoreError>;

    /// Replaces the stored document with `topology`.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyStoreError::Persist`] or
    /// [`TopologyStoreError::Serialize`] on failure; the previously stored
    /// document is left intact.
    fn persist(&self, topology: &ClusterTopology) -> Result<(), TopologyStoreError>;
}

/// Stores the topology as a YAML file.
#[derive(Clone, Debug)]
pub struct FileTopologyStore {
    path: Utf8PathBuf,
    cluster_name: String,
}

impl FileTopologyStore {
    /// Creates a store for `path`. `cluster_name` labels the document created
    /// on first use.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, cluster_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cluster_name: cluster_name.into(),
        }
    }

    /// Creates a store for `cluster.yaml` inside `config_dir`.
    #[must_use]
    pub fn in_dir(config_dir: &Utf8Path, cluster_name: impl Into<String>) -> Self {
        Self::new(config_dir.join(TOPOLOGY_FILE_NAME), cluster_name)
    }

    /// Location of the document.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl TopologyStore for FileTopologyStore {
    fn load(&self) -> Result<ClusterTopology, TopologyStoreError> {
        let present = files::exists(&self.path).map_err(|err| TopologyStoreError::Read {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        if !present {
            debug!(path = %self.path, "no topology document yet, starting empty");
            return Ok(ClusterTopology::new(self.cluster_name.clone()));
        }

        let contents =
            files::read_to_string(&self.path).map_err(|err| TopologyStoreError::Read {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        parse_document(&self.path, &contents)
    }

    fn persist(&self, topology: &ClusterTopology) -> Result<(), TopologyStoreError> {
        let rendered = topology
            .to_yaml()
            .map_err(|err| TopologyStoreError::Serialize {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        files::write_atomic(&self.path, rendered.as_bytes()).map_err(|err| {
            TopologyStoreError::Persist {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })?;
        debug!(path = %self.path, "topology persisted");
        Ok(())
    }
}

/// Parses `contents`, treating a blank file as an error rather than an empty
/// cluster so a truncated document is never silently replaced.
pub(crate) fn parse_document(
    path: &Utf8Path,
    contents: &str,
) -> Result<ClusterTopology, TopologyStoreError> {
    if contents.trim().is_empty() {
        return Err(TopologyStoreError::Parse {
            path: path.to_path_buf(),
            message: String::from("document is empty"),
        });
    }
    ClusterTopology::from_yaml(contents).map_err(|err| TopologyStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Keeps the topology in memory. Used by tests and by callers that manage
/// persistence themselves.
#[derive(Debug)]
pub struct MemoryTopologyStore {
    topology: Mutex<ClusterTopology>,
    fail_persist: bool,
}

impl MemoryTopologyStore {
    /// Creates a store seeded with `topology`.
    #[must_use]
    pub const fn new(topology: ClusterTopology) -> Self {
        Self {
            topology: Mutex::new(topology),
            fail_persist: false,
        }
    }

    /// Creates a store whose every persist fails, for exercising rollback.
    #[must_use]
    pub const fn failing(topology: ClusterTopology) -> Self {
        Self {
            topology: Mutex::new(topology),
            fail_persist: true,
        }
    }
}

impl TopologyStore for MemoryTopologyStore {
    fn load(&self) -> Result<ClusterTopology, TopologyStoreError> {
        Ok(self
            .topology
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn persist(&self, topology: &ClusterTopology) -> Result<(), TopologyStoreError> {
        if self.fail_persist {
            return Err(TopologyStoreError::Persist {
                path: Utf8PathBuf::from("<memory>"),
                message: String::from("persistence disabled"),
            });
        }
        *self
            .topology
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = topology.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests;
