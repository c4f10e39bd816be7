//! Core library for the `oracluster` cluster registry.
//!
//! The crate keeps a persisted topology of Oracle cluster machines (database
//! hosts, NFS servers, grid and standby nodes), stores one SSH key per node,
//! runs commands on nodes through the system `ssh` client, records NFS mount
//! intents between nodes and exports the topology for automation tools.
//! [`ClusterOrchestrator`] is the entry point that ties these together.

pub mod config;
pub mod credentials;
pub mod exec;
pub mod export;
mod files;
pub mod orchestrator;
pub mod registry;
pub mod test_support;
pub mod topology;
pub mod topology_store;
pub mod util;

pub use config::{ClusterConfig, ConfigError};
pub use credentials::{CredentialError, CredentialStore};
pub use exec::{
    CommandOutput, CommandRunner, ExecutionError, FleetResult, HostKeyPolicy,
    ProcessCommandRunner, RemoteCommandOutput, RemoteExecutor, SshOptions, SshTarget,
};
pub use export::{AutomationInventory, ExportError, TopologyExporter};
pub use orchestrator::{
    AddedNfsServer, AddedNode, ClusterOrchestrator, DeployOutcome, OrchestratorError,
    OrchestratorSettings,
};
pub use registry::{NodeRegistry, NodeSpec, RegistryError};
pub use topology::{
    ClusterTopology, GlobalSettings, MountBinding, NfsServer, Node, NodeRole, NodeStatus,
    UnknownRole,
};
pub use topology_store::{
    FileTopologyStore, MemoryTopologyStore, TopologyStore, TopologyStoreError,
};
