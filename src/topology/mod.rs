//! Cluster topology document: nodes, NFS servers, key references and the
//! global defaults copied into new database nodes.
//!
//! The whole document is persisted as one YAML mapping. Node and NFS server
//! names are the map keys; the `name` fields on the records are filled in
//! from those keys after parsing so callers never see a record whose name
//! disagrees with its key.
//!
//! Timestamps are written as RFC 3339. Naive ISO 8601 timestamps without an
//! offset, as older documents carry, are accepted on read and taken as UTC.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cluster name used when neither configuration nor an existing document
/// provides one.
pub const DEFAULT_CLUSTER_NAME: &str = "oracluster";

/// SSH user assigned to nodes registered without an explicit user.
pub const DEFAULT_SSH_USER: &str = "root";

/// Root aggregate persisted as a single document.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClusterTopology {
    /// Human readable cluster label.
    pub cluster_name: String,
    /// When the document was first created.
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    /// Refreshed on every mutation, right before persisting.
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    /// Registered nodes keyed by unique name.
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
    /// NFS server records keyed by the name of their `nfs` node.
    #[serde(default)]
    pub nfs_servers: BTreeMap<String, NfsServer>,
    /// Absolute key file path per node name.
    #[serde(default)]
    pub ssh_keys: BTreeMap<String, String>,
    /// Defaults snapshotted into database nodes at registration.
    #[serde(default)]
    pub global_settings: GlobalSettings,
}

impl ClusterTopology {
    /// Creates an empty topology stamped with the current time.
    #[must_use]
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            created_at: Utc::now(),
            updated_at: None,
            nodes: BTreeMap::new(),
            nfs_servers: BTreeMap::new(),
            ssh_keys: BTreeMap::new(),
            global_settings: GlobalSettings::default(),
        }
    }

    /// Parses a YAML document and restores record names from map keys.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_yaml::Error`] when the document is not
    /// a valid topology.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let mut topology: Self = serde_yaml::from_str(contents)?;
        topology.restore_names();
        Ok(topology)
    }

    /// Renders the document as YAML.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_yaml::Error`] when serialisation fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Marks the document as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    /// Recomputes the client IPs of `server` from the mount bindings that
    /// currently reference it.
    ///
    /// Unlike [`NfsServer::clients`], which only ever grows, this view drops
    /// the IPs of nodes that have since been removed.
    #[must_use]
    pub fn mounted_clients(&self, server: &str) -> BTreeSet<String> {
        self.nodes
            .values()
            .filter(|node| node.nfs_mounts.iter().any(|m| m.nfs_server == server))
            .map(|node| node.ip.clone())
            .collect()
    }

    /// Returns IPs recorded as clients of `server` that no registered node
    /// mounting it accounts for any more.
    #[must_use]
    pub fn stale_clients(&self, server: &str) -> BTreeSet<String> {
        let Some(record) = self.nfs_servers.get(server) else {
            return BTreeSet::new();
        };
        let live = self.mounted_clients(server);
        record.clients.difference(&live).cloned().collect()
    }

    fn restore_names(&mut self) {
        for (name, node) in &mut self.nodes {
            node.name.clone_from(name);
        }
        for (name, server) in &mut self.nfs_servers {
            server.name.clone_from(name);
        }
    }
}

/// Installation defaults shared by database nodes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GlobalSettings {
    /// `ORACLE_BASE` for new database nodes.
    pub oracle_base: String,
    /// `ORACLE_HOME` for new database nodes.
    pub oracle_home: String,
    /// Default RMAN backup location.
    pub backup_location: String,
    /// Default fast recovery area.
    pub fra_location: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            oracle_base: String::from("/u01/app/oracle"),
            oracle_home: String::from("/u01/app/oracle/product/19.3.0/dbhome_1"),
            backup_location: String::from("/backup"),
            fra_location: String::from("/fra"),
        }
    }
}

/// Role a node plays in the cluster.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Oracle database host.
    Database,
    /// NFS server exporting shared storage.
    Nfs,
    /// Grid infrastructure node.
    Grid,
    /// Data Guard standby host.
    Standby,
}

impl NodeRole {
    /// All roles in declaration order.
    pub const ALL: [Self; 4] = [Self::Database, Self::Nfs, Self::Grid, Self::Standby];

    /// Lowercase name used on disk and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Nfs => "nfs",
            Self::Grid => "grid",
            Self::Standby => "standby",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a role name is not one of the known roles.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown node role {0:?}: expected database, nfs, grid or standby")]
pub struct UnknownRole(
    /// The rejected input.
    pub String,
);

impl FromStr for NodeRole {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| UnknownRole(value.to_owned()))
    }
}

/// Lifecycle marker of a node.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Known to the registry; nothing has been installed by this tool.
    #[default]
    Registered,
    /// The deploy workflow completed successfully on the node.
    Deployed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registered => "registered",
            Self::Deployed => "deployed",
        })
    }
}

/// A registered machine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Node {
    /// Unique name; mirrors the key under which the node is stored.
    #[serde(default, skip_serializing)]
    pub name: String,
    /// Address used for SSH.
    pub ip: String,
    /// Cluster role.
    pub role: NodeRole,
    /// Login user for SSH.
    pub ssh_user: String,
    /// Name of the key file in the credential store, if any.
    #[serde(default)]
    pub ssh_key: Option<String>,
    /// Oracle SID, meaningful for database nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// `ORACLE_BASE` captured at registration (database nodes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_base: Option<String>,
    /// `ORACLE_HOME` captured at registration (database nodes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_home: Option<String>,
    /// Lifecycle marker.
    #[serde(default)]
    pub status: NodeStatus,
    /// Recorded NFS mount intents, in the order they were configured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nfs_mounts: Vec<MountBinding>,
    /// Registration time.
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub added_at: DateTime<Utc>,
    /// Set once the deploy workflow has succeeded on the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracledba_installed: Option<bool>,
}

/// NFS server record. The server is also registered as an `nfs` node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NfsServer {
    /// Name shared with the server's node record.
    #[serde(default, skip_serializing)]
    pub name: String,
    /// Server address.
    pub ip: String,
    /// Exported directories, in declaration order.
    #[serde(default)]
    pub export_paths: Vec<String>,
    /// IPs of nodes that have been bound to one of the exports. Grows on
    /// every mount and is never pruned.
    #[serde(default)]
    pub clients: BTreeSet<String>,
}

/// Intent that a node mounts an export of an NFS server.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MountBinding {
    /// Name of the NFS server.
    pub nfs_server: String,
    /// Exported path on the server.
    pub remote_path: String,
    /// Local mount point on the node.
    pub mount_point: String,
    /// When the binding was recorded.
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub configured_at: DateTime<Utc>,
}

mod timestamp;
