//! Exports of the cluster topology for other tools.
//!
//! Two files are produced next to the topology document: a verbatim
//! snapshot and an Ansible-style inventory grouping database hosts and NFS
//! servers. Both are written atomically.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::files;
use crate::registry::RegistryError;
use crate::topology::{ClusterTopology, Node, NodeRole};
use crate::topology_store::{TopologyStoreError, parse_document};

/// File name of the snapshot export.
pub const SNAPSHOT_FILE_NAME: &str = "cluster_export.yaml";

/// File name of the automation inventory export.
pub const INVENTORY_FILE_NAME: &str = "ansible_inventory.yaml";

/// Errors raised while exporting or re-reading exports.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExportError {
    /// Raised when an export file cannot be written.
    #[error("failed to write {path}: {message}")]
    Persistence {
        /// Destination path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the export cannot be rendered.
    #[error("failed to serialise {path}: {message}")]
    Serialize {
        /// Destination path.
        path: Utf8PathBuf,
        /// Serialiser error string.
        message: String,
    },
    /// Raised when a snapshot cannot be read back.
    #[error("failed to read {path}: {message}")]
    Read {
        /// Snapshot path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a snapshot is not a valid topology.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Snapshot path.
        path: Utf8PathBuf,
        /// Parser error string.
        message: String,
    },
    /// Raised when the topology to export cannot be loaded.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Ansible-style inventory document.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AutomationInventory {
    /// Top-level `all` group.
    pub all: InventoryRoot,
}

/// The `all` group, holding only child groups.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InventoryRoot {
    /// Child groups by role.
    pub children: InventoryGroups,
}

/// Host groups written to the inventory.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InventoryGroups {
    /// Nodes with the `database` role.
    pub database_nodes: HostGroup,
    /// Nodes with the `nfs` role.
    pub nfs_servers: HostGroup,
}

/// Hosts of one group keyed by node name.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct HostGroup {
    /// Host variables per node.
    pub hosts: BTreeMap<String, InventoryHost>,
}

/// Connection variables for one host.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InventoryHost {
    /// Address to connect to.
    pub ansible_host: String,
    /// Login user.
    pub ansible_user: String,
    /// Stored key path; `null` when the node has no key.
    pub ansible_ssh_private_key_file: Option<String>,
    /// Oracle SID; database hosts only, empty when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_sid: Option<String>,
    /// `ORACLE_HOME`; database hosts only, empty when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_home: Option<String>,
}

impl AutomationInventory {
    /// Builds the inventory for `topology`. Grid and standby nodes have no
    /// group and are left out.
    ///
    /// Key paths come from `ssh_keys`; pass the result of
    /// [`NodeRegistry::topology_with_resolved_keys`] to also cover nodes
    /// whose key is only named on the node record.
    ///
    /// [`NodeRegistry::topology_with_resolved_keys`]: crate::registry::NodeRegistry::topology_with_resolved_keys
    #[must_use]
    pub fn from_topology(topology: &ClusterTopology) -> Self {
        let mut inventory = Self::default();
        for node in topology.nodes.values() {
            let key = topology.ssh_keys.get(&node.name).cloned();
            match node.role {
                NodeRole::Database => {
                    let mut host = InventoryHost::for_node(node, key);
                    host.oracle_sid = Some(node.sid.clone().unwrap_or_default());
                    host.oracle_home = Some(node.oracle_home.clone().unwrap_or_default());
                    inventory
                        .all
                        .children
                        .database_nodes
                        .hosts
                        .insert(node.name.clone(), host);
                }
                NodeRole::Nfs => {
                    inventory
                        .all
                        .children
                        .nfs_servers
                        .hosts
                        .insert(node.name.clone(), InventoryHost::for_node(node, key));
                }
                NodeRole::Grid | NodeRole::Standby => {
                    debug!(node = %node.name, role = %node.role, "no inventory group for role");
                }
            }
        }
        inventory
    }
}

impl InventoryHost {
    fn for_node(node: &Node, key: Option<String>) -> Self {
        Self {
            ansible_host: node.ip.clone(),
            ansible_user: node.ssh_user.clone(),
            ansible_ssh_private_key_file: key,
            oracle_sid: None,
            oracle_home: None,
        }
    }
}

/// Writes export files into a directory.
#[derive(Clone, Debug)]
pub struct TopologyExporter {
    dir: Utf8PathBuf,
}

impl TopologyExporter {
    /// Creates an exporter writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the snapshot export.
    #[must_use]
    pub fn snapshot_path(&self) -> Utf8PathBuf {
        self.dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Location of the inventory export.
    #[must_use]
    pub fn inventory_path(&self) -> Utf8PathBuf {
        self.dir.join(INVENTORY_FILE_NAME)
    }

    /// Writes the whole topology to the snapshot file and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Serialize`] or [`ExportError::Persistence`]
    /// when the document cannot be rendered or written.
    pub fn export_snapshot(&self, topology: &ClusterTopology) -> Result<Utf8PathBuf, ExportError> {
        let path = self.snapshot_path();
        let rendered = topology.to_yaml().map_err(|err| ExportError::Serialize {
            path: path.clone(),
            message: err.to_string(),
        })?;
        write(&path, &rendered)?;
        info!(path = %path, nodes = topology.nodes.len(), "topology snapshot exported");
        Ok(path)
    }

    /// Writes the automation inventory and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Serialize`] or [`ExportError::Persistence`]
    /// when the inventory cannot be rendered or written.
    pub fn export_automation_inventory(
        &self,
        topology: &ClusterTopology,
    ) -> Result<Utf8PathBuf, ExportError> {
        let path = self.inventory_path();
        let inventory = AutomationInventory::from_topology(topology);
        let rendered = serde_yaml::to_string(&inventory).map_err(|err| ExportError::Serialize {
            path: path.clone(),
            message: err.to_string(),
        })?;
        write(&path, &rendered)?;
        info!(
            path = %path,
            database_nodes = inventory.all.children.database_nodes.hosts.len(),
            nfs_servers = inventory.all.children.nfs_servers.hosts.len(),
            "automation inventory exported"
        );
        Ok(path)
    }

    /// Loads a snapshot written by [`TopologyExporter::export_snapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Read`] or [`ExportError::Parse`] when the file
    /// cannot be read or is not a topology.
    pub fn read_snapshot(path: &Utf8Path) -> Result<ClusterTopology, ExportError> {
        let contents = files::read_to_string(path).map_err(|err| ExportError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        parse_document(path, &contents).map_err(|err| match err {
            TopologyStoreError::Parse { path: bad, message } => {
                ExportError::Parse { path: bad, message }
            }
            other => ExportError::Read {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })
    }
}

fn write(path: &Utf8Path, contents: &str) -> Result<(), ExportError> {
    files::write_atomic(path, contents.as_bytes()).map_err(|err| ExportError::Persistence {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests;
