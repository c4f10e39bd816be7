//! Facade tying the registry, the remote executor and the exporter together.
//!
//! Remote operations resolve the node and its key through the registry
//! before any process is spawned, so lookup failures never touch the
//! network.

use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::exec::{
    CommandRunner, DEFAULT_CONNECTION_CHECK_TIMEOUT, DEFAULT_EXEC_TIMEOUT, ExecutionError,
    FleetResult, RemoteCommandOutput, RemoteExecutor, SshTarget,
};
use crate::export::{ExportError, TopologyExporter};
use crate::registry::{NodeRegistry, NodeSpec, RegistryError};
use crate::topology::{NfsServer, Node};
use crate::topology_store::TopologyStore;

/// Default number of nodes contacted at once by fleet operations.
pub const DEFAULT_FLEET_CONCURRENCY: usize = 8;

/// Deadline for the deploy script.
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(3600);

/// Tunables for [`ClusterOrchestrator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrchestratorSettings {
    /// Whether newly registered nodes with a key get an SSH connection check.
    pub check_connection_on_add: bool,
    /// Deadline for the registration connection check.
    pub connection_check_timeout: Duration,
    /// Deadline for ordinary remote commands.
    pub exec_timeout: Duration,
    /// Deadline for the deploy script.
    pub deploy_timeout: Duration,
    /// Script run by [`ClusterOrchestrator::deploy`].
    pub deploy_script: String,
    /// Maximum number of nodes contacted at once.
    pub fleet_concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            check_connection_on_add: true,
            connection_check_timeout: DEFAULT_CONNECTION_CHECK_TIMEOUT,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
            deploy_script: crate::config::DEFAULT_DEPLOY_SCRIPT.to_owned(),
            fleet_concurrency: DEFAULT_FLEET_CONCURRENCY,
        }
    }
}

/// Errors raised by workflows spanning several components.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestratorError {
    /// Raised when a registry operation fails.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Raised when the remote command could not be run.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Result of registering a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddedNode {
    /// The stored record.
    pub node: Node,
    /// Connection check outcome; `None` when none was run.
    pub reachable: Option<bool>,
}

/// Result of registering an NFS server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddedNfsServer {
    /// The stored server record.
    pub server: NfsServer,
    /// Connection check outcome; `None` when none was run.
    pub reachable: Option<bool>,
}

/// Result of a deploy run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployOutcome {
    /// Raw output of the deploy script.
    pub output: RemoteCommandOutput,
    /// Updated record when the script succeeded.
    pub node: Option<Node>,
}

/// Entry point for every cluster operation.
#[derive(Debug)]
pub struct ClusterOrchestrator<S: TopologyStore, R: CommandRunner> {
    registry: NodeRegistry<S>,
    executor: RemoteExecutor<R>,
    exporter: TopologyExporter,
    settings: OrchestratorSettings,
}

impl<S: TopologyStore, R: CommandRunner> ClusterOrchestrator<S, R> {
    /// Assembles an orchestrator from its parts.
    #[must_use]
    pub const fn new(
        registry: NodeRegistry<S>,
        executor: RemoteExecutor<R>,
        exporter: TopologyExporter,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            executor,
            exporter,
            settings,
        }
    }

    /// Returns the registry for plain reads and mutations.
    #[must_use]
    pub const fn registry(&self) -> &NodeRegistry<S> {
        &self.registry
    }

    /// Returns the remote executor.
    #[must_use]
    pub const fn executor(&self) -> &RemoteExecutor<R> {
        &self.executor
    }

    /// Returns the exporter.
    #[must_use]
    pub const fn exporter(&self) -> &TopologyExporter {
        &self.exporter
    }

    /// Returns the active settings.
    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Registers a node and, when enabled and a key was given, checks its SSH
    /// connection.
    ///
    /// An unreachable node is still registered; the check result is only
    /// reported.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when registration fails.
    pub async fn add_node(&self, spec: NodeSpec) -> Result<AddedNode, RegistryError> {
        let node = self.registry.add_node(spec)?;
        let reachable = self.check_connection(&node).await;
        Ok(AddedNode { node, reachable })
    }

    /// Registers an NFS server and its `nfs` node, then checks the SSH
    /// connection to the node the same way as [`ClusterOrchestrator::add_node`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when registration fails.
    pub async fn add_nfs_server(
        &self,
        spec: NodeSpec,
        export_paths: &[String],
    ) -> Result<AddedNfsServer, RegistryError> {
        let server = self.registry.add_nfs_server(spec, export_paths)?;
        let node = self.registry.show_node(&server.name)?;
        let reachable = self.check_connection(&node).await;
        Ok(AddedNfsServer { server, reachable })
    }

    async fn check_connection(&self, node: &Node) -> Option<bool> {
        if !self.settings.check_connection_on_add {
            return None;
        }
        let key_path = match self.registry.resolve_key(&node.name) {
            Ok(Some(path)) => path,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    node = %node.name,
                    error = %err,
                    "cannot resolve key for connection check"
                );
                return Some(false);
            }
        };
        let reachable = self
            .executor
            .test_connection(
                &node.ip,
                &node.ssh_user,
                &key_path,
                self.settings.connection_check_timeout,
            )
            .await;
        if reachable {
            info!(node = %node.name, "SSH connectivity verified");
        }
        Some(reachable)
    }

    /// Runs `command` on the named node with the configured deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::NodeNotFound`] or
    /// [`ExecutionError::NoCredential`] before any connection is attempted,
    /// and [`ExecutionError::Timeout`] when the command overruns.
    pub async fn execute(
        &self,
        node: &str,
        command: &str,
    ) -> Result<RemoteCommandOutput, ExecutionError> {
        self.execute_with_timeout(node, command, self.settings.exec_timeout)
            .await
    }

    /// Runs `command` on the named node with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`ClusterOrchestrator::execute`].
    pub async fn execute_with_timeout(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteCommandOutput, ExecutionError> {
        let target = self.registry.ssh_target(node)?;
        self.executor.execute(&target, command, timeout).await
    }

    /// Runs `command` on every named node, at most
    /// [`OrchestratorSettings::fleet_concurrency`] at a time.
    ///
    /// Nodes that cannot be resolved get an error result without a
    /// connection attempt; the rest run concurrently. Results are returned in
    /// node name order.
    pub async fn execute_many(&self, nodes: &[String], command: &str) -> Vec<FleetResult> {
        let mut results = Vec::with_capacity(nodes.len());
        let mut targets: Vec<SshTarget> = Vec::with_capacity(nodes.len());
        for node in nodes {
            match self.registry.ssh_target(node) {
                Ok(target) => targets.push(target),
                Err(err) => results.push(FleetResult {
                    node: node.clone(),
                    outcome: Err(err),
                }),
            }
        }

        results.extend(
            self.executor
                .execute_many(
                    &targets,
                    command,
                    self.settings.exec_timeout,
                    self.settings.fleet_concurrency,
                )
                .await,
        );
        results.sort_by(|left, right| left.node.cmp(&right.node));
        results
    }

    /// Runs the deploy script on `node` and marks the node deployed when it
    /// exits with status zero.
    ///
    /// A failed script is not an error: the output is returned unchanged and
    /// the node keeps its status.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Execution`] when the script could not be
    /// run and [`OrchestratorError::Registry`] when the status update fails.
    pub async fn deploy(&self, node: &str) -> Result<DeployOutcome, OrchestratorError> {
        info!(node, "deploying");
        let output = self
            .execute_with_timeout(
                node,
                &self.settings.deploy_script,
                self.settings.deploy_timeout,
            )
            .await?;
        if !output.is_success() {
            warn!(node, exit_code = output.exit_code, "deploy script failed");
            return Ok(DeployOutcome { output, node: None });
        }
        let updated = self.registry.mark_deployed(node)?;
        Ok(DeployOutcome {
            output,
            node: Some(updated),
        })
    }

    /// Writes the topology snapshot export.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] when the topology cannot be loaded or the file
    /// cannot be written.
    pub fn export_snapshot(&self) -> Result<Utf8PathBuf, ExportError> {
        let topology = self.registry.topology()?;
        self.exporter.export_snapshot(&topology)
    }

    /// Writes the automation inventory export.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] when the topology cannot be loaded or the file
    /// cannot be written.
    pub fn export_automation_inventory(&self) -> Result<Utf8PathBuf, ExportError> {
        let topology = self.registry.topology_with_resolved_keys()?;
        self.exporter.export_automation_inventory(&topology)
    }
}
