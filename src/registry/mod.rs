//! Node registry: every read and mutation of the cluster topology.
//!
//! Each mutation loads the current document, changes it, refreshes
//! `updated_at` and persists the whole document before returning. Nothing is
//! cached between calls, so the document on disk is the single source of
//! truth.

use std::collections::BTreeSet;

use camino::Utf8PathBuf;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::exec::{ExecutionError, SshTarget};
use crate::topology::{
    ClusterTopology, DEFAULT_SSH_USER, MountBinding, NfsServer, Node, NodeRole, NodeStatus,
};
use crate::topology_store::TopologyStore;

mod error;

pub use error::RegistryError;

/// Inputs for registering a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeSpec {
    name: String,
    ip: String,
    role: NodeRole,
    ssh_user: String,
    ssh_key: Option<Utf8PathBuf>,
    sid: Option<String>,
}

impl NodeSpec {
    /// Creates a spec with the default SSH user and no key.
    #[must_use]
    pub fn new(name: impl Into<String>, ip: impl Into<String>, role: NodeRole) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            role,
            ssh_user: DEFAULT_SSH_USER.to_owned(),
            ssh_key: None,
            sid: None,
        }
    }

    /// Sets the SSH login user.
    #[must_use]
    pub fn ssh_user(mut self, value: impl Into<String>) -> Self {
        self.ssh_user = value.into();
        self
    }

    /// Sets the private key to copy into the credential store.
    #[must_use]
    pub fn ssh_key(mut self, value: Option<Utf8PathBuf>) -> Self {
        self.ssh_key = value;
        self
    }

    /// Sets the Oracle SID.
    #[must_use]
    pub fn sid(mut self, value: Option<String>) -> Self {
        self.sid = value;
        self
    }

    fn validate(&self) -> Result<(), RegistryError> {
        CredentialStore::key_name(&self.name)
            .map_err(|_| RegistryError::invalid("name", "must be a non-blank file-safe name"))?;
        if self.name.trim() != self.name {
            return Err(RegistryError::invalid(
                "name",
                "must not have surrounding whitespace",
            ));
        }
        if self.ip.trim().is_empty() {
            return Err(RegistryError::invalid("ip", "must not be blank"));
        }
        if self.ssh_user.trim().is_empty() {
            return Err(RegistryError::invalid("ssh_user", "must not be blank"));
        }
        Ok(())
    }
}

/// CRUD over the persisted cluster topology.
#[derive(Debug)]
pub struct NodeRegistry<S: TopologyStore> {
    store: S,
    credentials: CredentialStore,
}

impl<S: TopologyStore> NodeRegistry<S> {
    /// Creates a registry over `store`, keeping keys in `credentials`.
    #[must_use]
    pub const fn new(store: S, credentials: CredentialStore) -> Self {
        Self { store, credentials }
    }

    /// Returns the credential store.
    #[must_use]
    pub const fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Returns a snapshot of the whole topology.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] when the document cannot be
    /// loaded.
    pub fn topology(&self) -> Result<ClusterTopology, RegistryError> {
        Ok(self.store.load()?)
    }

    /// Returns the topology with `ssh_keys` completed from the key names
    /// recorded on the nodes, resolved the same way as [`Self::ssh_target`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] when the document cannot be
    /// loaded.
    pub fn topology_with_resolved_keys(&self) -> Result<ClusterTopology, RegistryError> {
        let mut topology = self.store.load()?;
        let resolved: Vec<(String, Utf8PathBuf)> = topology
            .nodes
            .keys()
            .filter_map(|name| {
                self.key_for(&topology, name)
                    .map(|path| (name.clone(), path))
            })
            .collect();
        for (name, path) in resolved {
            topology.ssh_keys.insert(name, path.into_string());
        }
        Ok(topology)
    }

    /// Registers a node, copying its key into the credential store first.
    ///
    /// Database nodes receive the current global `oracle_base` and
    /// `oracle_home`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`] when the name is taken,
    /// [`RegistryError::InvalidField`] for blank inputs,
    /// [`RegistryError::Credential`] when the key cannot be copied and
    /// [`RegistryError::Persistence`] when the document cannot be saved.
    pub fn add_node(&self, spec: NodeSpec) -> Result<Node, RegistryError> {
        let node = self.register(spec, None)?;
        info!(node = %node.name, role = %node.role, ip = %node.ip, "node registered");
        Ok(node)
    }

    /// Registers an NFS server: an `nfs` node plus the server record, saved
    /// together. The role in `spec` is ignored.
    ///
    /// A record left behind by a removed node of the same name is replaced;
    /// its recorded clients are kept.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`NodeRegistry::add_node`], and
    /// [`RegistryError::InvalidField`] when no export path is given.
    pub fn add_nfs_server(
        &self,
        spec: NodeSpec,
        export_paths: &[String],
    ) -> Result<NfsServer, RegistryError> {
        let exports: Vec<String> = export_paths
            .iter()
            .map(|path| path.trim())
            .filter(|path| !path.is_empty())
            .map(str::to_owned)
            .collect();
        if exports.is_empty() {
            return Err(RegistryError::invalid(
                "export_paths",
                "at least one export path is required",
            ));
        }

        let mut server = NfsServer {
            name: spec.name.clone(),
            ip: spec.ip.trim().to_owned(),
            export_paths: exports,
            clients: BTreeSet::new(),
        };
        let nfs_spec = NodeSpec {
            role: NodeRole::Nfs,
            ..spec
        };
        self.register(nfs_spec, Some(&mut server))?;
        info!(
            server = %server.name,
            ip = %server.ip,
            exports = server.export_paths.len(),
            "NFS server registered"
        );
        Ok(server)
    }

    fn register(
        &self,
        spec: NodeSpec,
        server: Option<&mut NfsServer>,
    ) -> Result<Node, RegistryError> {
        spec.validate()?;
        let mut topology = self.store.load()?;
        if topology.nodes.contains_key(&spec.name) {
            return Err(RegistryError::AlreadyExists { name: spec.name });
        }

        let key_name = match spec.ssh_key.as_deref() {
            Some(source) => Some(self.credentials.store_key(&spec.name, source)?),
            None => None,
        };
        if let Some(ref key) = key_name {
            topology.ssh_keys.insert(
                spec.name.clone(),
                self.credentials.key_path(key).into_string(),
            );
        }

        let is_database = spec.role == NodeRole::Database;
        let node = Node {
            name: spec.name.clone(),
            ip: spec.ip.trim().to_owned(),
            role: spec.role,
            ssh_user: spec.ssh_user.trim().to_owned(),
            ssh_key: key_name.clone(),
            sid: spec.sid.filter(|sid| !sid.trim().is_empty()),
            oracle_base: is_database.then(|| topology.global_settings.oracle_base.clone()),
            oracle_home: is_database.then(|| topology.global_settings.oracle_home.clone()),
            status: NodeStatus::Registered,
            nfs_mounts: Vec::new(),
            added_at: Utc::now(),
            oracledba_installed: None,
        };
        topology.nodes.insert(node.name.clone(), node.clone());
        if let Some(record) = server {
            if let Some(orphan) = topology.nfs_servers.remove(&record.name) {
                debug!(
                    server = %record.name,
                    "replacing NFS server record left by a removed node"
                );
                record.clients.extend(orphan.clients);
            }
            topology
                .nfs_servers
                .insert(record.name.clone(), record.clone());
        }

        if let Err(err) = self.save(&mut topology) {
            if key_name.is_some()
                && let Err(cleanup) = self.credentials.delete_key(&node.name)
            {
                warn!(node = %node.name, error = %cleanup, "failed to remove copied SSH key");
            }
            return Err(err);
        }
        Ok(node)
    }

    /// Unregisters a node and deletes its stored key.
    ///
    /// The NFS server record of an `nfs` node and client IPs recorded on
    /// other servers are left untouched. Registering an NFS server under the
    /// same name later takes the record over.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NodeNotFound`] when the node is unknown and
    /// [`RegistryError::Persistence`] when the document cannot be saved.
    pub fn remove_node(&self, name: &str) -> Result<Node, RegistryError> {
        let mut topology = self.store.load()?;
        let node = topology
            .nodes
            .remove(name)
            .ok_or_else(|| RegistryError::NodeNotFound {
                name: name.to_owned(),
            })?;
        let had_key = topology.ssh_keys.remove(name).is_some() || node.ssh_key.is_some();
        self.save(&mut topology)?;

        if had_key && let Err(err) = self.credentials.delete_key(name) {
            warn!(node = name, error = %err, "node removed but its SSH key could not be deleted");
        }
        info!(node = name, "node removed");
        Ok(node)
    }

    /// Lists nodes in name order, optionally restricted to one role.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] when the document cannot be
    /// loaded.
    pub fn list_nodes(&self, role: Option<NodeRole>) -> Result<Vec<Node>, RegistryError> {
        let topology = self.store.load()?;
        Ok(topology
            .nodes
            .into_values()
            .filter(|node| role.is_none_or(|wanted| node.role == wanted))
            .collect())
    }

    /// Returns one node.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NodeNotFound`] when the node is unknown.
    pub fn show_node(&self, name: &str) -> Result<Node, RegistryError> {
        let mut topology = self.store.load()?;
        topology
            .nodes
            .remove(name)
            .ok_or_else(|| RegistryError::NodeNotFound {
                name: name.to_owned(),
            })
    }

    /// Returns one NFS server record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NfsServerNotFound`] when the server is
    /// unknown.
    pub fn nfs_server(&self, name: &str) -> Result<NfsServer, RegistryError> {
        let mut topology = self.store.load()?;
        topology
            .nfs_servers
            .remove(name)
            .ok_or_else(|| RegistryError::NfsServerNotFound {
                name: name.to_owned(),
            })
    }

    /// Lists NFS servers in name order.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] when the document cannot be
    /// loaded.
    pub fn list_nfs_servers(&self) -> Result<Vec<NfsServer>, RegistryError> {
        Ok(self.store.load()?.nfs_servers.into_values().collect())
    }

    /// Records that `node` mounts `remote_path` from `server` at
    /// `mount_point` and adds the node IP to the server's clients.
    ///
    /// Nothing is mounted on the node; the binding is only an intent. A
    /// `remote_path` that the server does not export is accepted with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NodeNotFound`] or
    /// [`RegistryError::NfsServerNotFound`] when either end is unknown, and
    /// [`RegistryError::InvalidField`] for blank paths.
    pub fn mount_nfs(
        &self,
        node: &str,
        server: &str,
        remote_path: &str,
        mount_point: &str,
    ) -> Result<MountBinding, RegistryError> {
        if remote_path.trim().is_empty() {
            return Err(RegistryError::invalid("remote_path", "must not be blank"));
        }
        if mount_point.trim().is_empty() {
            return Err(RegistryError::invalid("mount_point", "must not be blank"));
        }

        let mut topology = self.store.load()?;
        let client = topology
            .nodes
            .get_mut(node)
            .ok_or_else(|| RegistryError::NodeNotFound {
                name: node.to_owned(),
            })?;
        let record = topology
            .nfs_servers
            .get_mut(server)
            .ok_or_else(|| RegistryError::NfsServerNotFound {
                name: server.to_owned(),
            })?;

        let remote = remote_path.trim().to_owned();
        if !record.export_paths.contains(&remote) {
            warn!(
                server,
                remote_path = %remote,
                "remote path is not one of the server's declared exports"
            );
        }
        let binding = MountBinding {
            nfs_server: server.to_owned(),
            remote_path: remote,
            mount_point: mount_point.trim().to_owned(),
            configured_at: Utc::now(),
        };
        client.nfs_mounts.push(binding.clone());
        record.clients.insert(client.ip.clone());

        self.save(&mut topology)?;
        info!(
            node,
            server,
            remote_path = %binding.remote_path,
            mount_point = %binding.mount_point,
            "NFS mount recorded"
        );
        Ok(binding)
    }

    /// Path of the key stored for `name`, or `None` when the node has no key.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] when the document cannot be
    /// loaded.
    pub fn resolve_key(&self, name: &str) -> Result<Option<Utf8PathBuf>, RegistryError> {
        let topology = self.store.load()?;
        Ok(self.key_for(&topology, name))
    }

    /// Resolves everything needed to reach `name` over SSH.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::NodeNotFound`] when the node is unknown,
    /// [`ExecutionError::NoCredential`] when it has no key and
    /// [`ExecutionError::Topology`] when the document cannot be loaded.
    pub fn ssh_target(&self, name: &str) -> Result<SshTarget, ExecutionError> {
        let topology = self.store.load()?;
        let node = topology
            .nodes
            .get(name)
            .ok_or_else(|| ExecutionError::NodeNotFound {
                node: name.to_owned(),
            })?;
        let key_path = self
            .key_for(&topology, name)
            .ok_or_else(|| ExecutionError::NoCredential {
                node: name.to_owned(),
            })?;
        Ok(SshTarget {
            node: name.to_owned(),
            host: node.ip.clone(),
            user: node.ssh_user.clone(),
            key_path,
        })
    }

    /// Marks `name` as deployed after a successful deploy run.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NodeNotFound`] when the node is unknown and
    /// [`RegistryError::Persistence`] when the document cannot be saved.
    pub fn mark_deployed(&self, name: &str) -> Result<Node, RegistryError> {
        let mut topology = self.store.load()?;
        let node = topology
            .nodes
            .get_mut(name)
            .ok_or_else(|| RegistryError::NodeNotFound {
                name: name.to_owned(),
            })?;
        node.status = NodeStatus::Deployed;
        node.oracledba_installed = Some(true);
        let updated = node.clone();
        self.save(&mut topology)?;
        info!(node = name, "node marked as deployed");
        Ok(updated)
    }

    fn key_for(&self, topology: &ClusterTopology, name: &str) -> Option<Utf8PathBuf> {
        if let Some(path) = topology.ssh_keys.get(name) {
            return Some(Utf8PathBuf::from(path));
        }
        topology
            .nodes
            .get(name)
            .and_then(|node| node.ssh_key.as_deref())
            .map(|key| self.credentials.key_path(key))
    }

    fn save(&self, topology: &mut ClusterTopology) -> Result<(), RegistryError> {
        topology.touch();
        self.store.persist(topology)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
