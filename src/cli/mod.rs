//! Command-line interface definitions for the `oracluster` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must not depend on library types.

use clap::Parser;

/// Accepted values for `--role`.
pub(crate) const ROLES: [&str; 4] = ["database", "nfs", "grid", "standby"];

/// Top-level CLI for the `oracluster` binary.
#[derive(Debug, Parser)]
#[command(
    name = "oracluster",
    about = "Track Oracle cluster nodes, their SSH keys and NFS mounts, and run commands on them",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Register a node.
    #[command(name = "add-node", about = "Register a node")]
    AddNode(AddNodeCommand),
    /// Unregister a node and delete its stored key.
    #[command(name = "remove-node", about = "Unregister a node and delete its key")]
    RemoveNode(RemoveNodeCommand),
    /// List registered nodes.
    #[command(name = "list", about = "List registered nodes")]
    List(ListCommand),
    /// Show one node.
    #[command(name = "show", about = "Show one node")]
    Show(ShowCommand),
    /// Register an NFS server.
    #[command(name = "add-nfs", about = "Register an NFS server and its exports")]
    AddNfs(AddNfsCommand),
    /// List NFS servers with their clients.
    #[command(name = "list-nfs", about = "List NFS servers and their clients")]
    ListNfs(ListNfsCommand),
    /// Record that a node mounts an NFS export.
    #[command(name = "mount-nfs", about = "Record that a node mounts an NFS export")]
    MountNfs(MountNfsCommand),
    /// Run a command on one node.
    #[command(name = "ssh", about = "Run a command on one node over SSH")]
    Ssh(SshCommand),
    /// Run a command on many nodes.
    #[command(name = "exec-all", about = "Run a command on every node, or every node of a role")]
    ExecAll(ExecAllCommand),
    /// Run the deploy script on a node.
    #[command(name = "deploy", about = "Run the deploy script on a node")]
    Deploy(DeployCommand),
    /// Export the topology.
    #[command(name = "export", about = "Export the topology snapshot or automation inventory")]
    Export(ExportCommand),
}

/// Arguments for `oracluster add-node`.
#[derive(Debug, Parser)]
pub(crate) struct AddNodeCommand {
    /// Unique node name.
    #[arg(long)]
    pub(crate) name: String,
    /// Address used for SSH.
    #[arg(long)]
    pub(crate) ip: String,
    /// Cluster role.
    #[arg(long, default_value = "database", value_parser = ROLES)]
    pub(crate) role: String,
    /// Private key to copy into the key store.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_key: Option<String>,
    /// SSH login user.
    #[arg(long, default_value = "root")]
    pub(crate) ssh_user: String,
    /// Oracle SID.
    #[arg(long)]
    pub(crate) sid: Option<String>,
}

/// Arguments for `oracluster remove-node`.
#[derive(Debug, Parser)]
pub(crate) struct RemoveNodeCommand {
    /// Node to remove.
    pub(crate) name: String,
    /// Skip the confirmation prompt.
    #[arg(long)]
    pub(crate) force: bool,
}

/// Arguments for `oracluster list`.
#[derive(Debug, Parser)]
pub(crate) struct ListCommand {
    /// Only list nodes with this role.
    #[arg(long, value_parser = ROLES)]
    pub(crate) role: Option<String>,
    /// Print JSON instead of a table.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for `oracluster show`.
#[derive(Debug, Parser)]
pub(crate) struct ShowCommand {
    /// Node to show.
    pub(crate) name: String,
    /// Print JSON instead of text.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for `oracluster add-nfs`.
#[derive(Debug, Parser)]
pub(crate) struct AddNfsCommand {
    /// Unique server name.
    #[arg(long)]
    pub(crate) name: String,
    /// Server address.
    #[arg(long)]
    pub(crate) ip: String,
    /// Comma-separated exported paths.
    #[arg(long, required = true, value_delimiter = ',')]
    pub(crate) exports: Vec<String>,
    /// Private key to copy into the key store.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_key: Option<String>,
    /// SSH login user.
    #[arg(long, default_value = "root")]
    pub(crate) ssh_user: String,
}

/// Arguments for `oracluster list-nfs`.
#[derive(Debug, Parser)]
pub(crate) struct ListNfsCommand {
    /// Print JSON instead of text.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for `oracluster mount-nfs`.
#[derive(Debug, Parser)]
pub(crate) struct MountNfsCommand {
    /// Client node.
    #[arg(long)]
    pub(crate) node: String,
    /// NFS server name.
    #[arg(long)]
    pub(crate) nfs_server: String,
    /// Exported path on the server.
    #[arg(long)]
    pub(crate) remote_path: String,
    /// Mount point on the node.
    #[arg(long)]
    pub(crate) mount_point: String,
}

/// Arguments for `oracluster ssh`.
#[derive(Debug, Parser)]
pub(crate) struct SshCommand {
    /// Target node.
    pub(crate) node: String,
    /// Command to run. A single argument is passed to the remote shell as is;
    /// several arguments are quoted individually (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for `oracluster exec-all`.
#[derive(Debug, Parser)]
pub(crate) struct ExecAllCommand {
    /// Only target nodes with this role.
    #[arg(long, value_parser = ROLES)]
    pub(crate) role: Option<String>,
    /// Command to run, quoted as for `ssh`.
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for `oracluster deploy`.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Target node.
    pub(crate) node: String,
}

/// Arguments for `oracluster export`.
#[derive(Debug, Parser)]
pub(crate) struct ExportCommand {
    /// `yaml` for the topology snapshot, `ansible` for the inventory, `all`
    /// for both.
    #[arg(long, default_value = "yaml", value_parser = ["yaml", "ansible", "all"])]
    pub(crate) format: String,
}
