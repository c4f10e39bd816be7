//! Binary entry point for the oracluster CLI.

use std::io::{self, BufRead, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use serde::Serialize;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use oracluster::{
    ClusterConfig, ClusterOrchestrator, CommandRunner, ConfigError, CredentialStore,
    ExecutionError, ExportError, FileTopologyStore, NfsServer, Node, NodeRegistry, NodeRole,
    NodeSpec, OrchestratorError, ProcessCommandRunner, RegistryError, RemoteCommandOutput,
    RemoteExecutor, TopologyExporter, TopologyStore, UnknownRole,
};

mod cli;

use cli::{
    AddNfsCommand, AddNodeCommand, Cli, ExecAllCommand, ExportCommand, ListCommand,
    ListNfsCommand, MountNfsCommand, RemoveNodeCommand, ShowCommand, SshCommand,
};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "ORACLUSTER_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Role(#[from] UnknownRole),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("failed to render output: {0}")]
    Render(String),
    #[error("aborted")]
    Aborted,
}

/// Streams used by command handlers.
struct Console<O, E, I> {
    out: O,
    err: E,
    input: I,
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = ClusterConfig::load_without_cli_args()?;
    config.validate()?;
    let orchestrator = build_orchestrator(&config);
    let mut console = Console {
        out: io::stdout(),
        err: io::stderr(),
        input: io::stdin().lock(),
    };
    run(cli, &orchestrator, &mut console).await
}

fn build_orchestrator(
    config: &ClusterConfig,
) -> ClusterOrchestrator<FileTopologyStore, ProcessCommandRunner> {
    let config_dir = config.config_dir_path();
    ClusterOrchestrator::new(
        NodeRegistry::new(
            FileTopologyStore::in_dir(&config_dir, config.cluster_name.clone()),
            CredentialStore::in_config_dir(&config_dir),
        ),
        RemoteExecutor::with_process_runner(config.ssh_options()),
        TopologyExporter::new(config_dir),
        config.orchestrator_settings(),
    )
}

async fn run<S, R, O, E, I>(
    cli: Cli,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError>
where
    S: TopologyStore,
    R: CommandRunner,
    O: Write,
    E: Write,
    I: BufRead,
{
    match cli {
        Cli::AddNode(args) => add_node(args, orchestrator, console).await,
        Cli::RemoveNode(args) => remove_node(&args, orchestrator, console),
        Cli::List(args) => list_nodes(&args, orchestrator, console),
        Cli::Show(args) => show_node(&args, orchestrator, console),
        Cli::AddNfs(args) => add_nfs(args, orchestrator, console).await,
        Cli::ListNfs(args) => list_nfs(&args, orchestrator, console),
        Cli::MountNfs(args) => mount_nfs(&args, orchestrator, console),
        Cli::Ssh(args) => ssh(&args, orchestrator, console).await,
        Cli::ExecAll(args) => exec_all(&args, orchestrator, console).await,
        Cli::Deploy(args) => deploy(&args.node, orchestrator, console).await,
        Cli::Export(args) => export(&args, orchestrator, console),
    }
}

async fn add_node<S: TopologyStore, R: CommandRunner, O: Write, E: Write, I>(
    args: AddNodeCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    let role: NodeRole = args.role.parse()?;
    let spec = NodeSpec::new(args.name, args.ip, role)
        .ssh_user(args.ssh_user)
        .ssh_key(args.ssh_key.map(Utf8PathBuf::from))
        .sid(args.sid);
    let added = orchestrator.add_node(spec).await?;

    writeln!(
        console.out,
        "Node {} ({}) registered at {}",
        added.node.name, added.node.role, added.node.ip
    )
    .ok();
    report_reachability(console, added.reachable);
    Ok(0)
}

fn report_reachability<O: Write, E: Write, I>(
    console: &mut Console<O, E, I>,
    reachable: Option<bool>,
) {
    match reachable {
        Some(true) => {
            writeln!(console.out, "SSH connectivity verified").ok();
        }
        Some(false) => {
            writeln!(
                console.err,
                "warning: SSH connectivity test failed; the node is registered anyway"
            )
            .ok();
        }
        None => {}
    }
}

fn remove_node<S: TopologyStore, R: CommandRunner, O: Write, E: Write, I: BufRead>(
    args: &RemoveNodeCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    if !args.force && !confirm(console, &format!("Remove node {}?", args.name)) {
        return Err(CliError::Aborted);
    }
    orchestrator.registry().remove_node(&args.name)?;
    writeln!(console.out, "Node {} removed", args.name).ok();
    Ok(0)
}

fn confirm<O: Write, E, I: BufRead>(console: &mut Console<O, E, I>, question: &str) -> bool {
    write!(console.out, "{question} [y/N] ").ok();
    console.out.flush().ok();
    let mut answer = String::new();
    if console.input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[derive(Serialize)]
struct NodeView<'a> {
    name: &'a str,
    #[serde(flatten)]
    node: &'a Node,
}

#[derive(Serialize)]
struct NfsServerView<'a> {
    name: &'a str,
    #[serde(flatten)]
    server: &'a NfsServer,
}

fn list_nodes<S: TopologyStore, R: CommandRunner, O: Write, E, I>(
    args: &ListCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    let role = args
        .role
        .as_deref()
        .map(str::parse::<NodeRole>)
        .transpose()?;
    let nodes = orchestrator.registry().list_nodes(role)?;

    if args.json {
        let views: Vec<NodeView<'_>> = nodes
            .iter()
            .map(|node| NodeView {
                name: &node.name,
                node,
            })
            .collect();
        writeln!(console.out, "{}", to_json(&views)?).ok();
        return Ok(0);
    }

    if nodes.is_empty() {
        writeln!(console.out, "No nodes registered").ok();
        return Ok(0);
    }
    writeln!(
        console.out,
        "{:<16} {:<16} {:<9} {:<10} {:<11} {:<8} {}",
        "NAME", "IP", "ROLE", "USER", "STATUS", "SID", "KEY"
    )
    .ok();
    for node in &nodes {
        writeln!(
            console.out,
            "{:<16} {:<16} {:<9} {:<10} {:<11} {:<8} {}",
            node.name,
            node.ip,
            node.role,
            node.ssh_user,
            node.status,
            node.sid.as_deref().unwrap_or("-"),
            if node.ssh_key.is_some() { "yes" } else { "no" }
        )
        .ok();
    }
    Ok(0)
}

fn show_node<S: TopologyStore, R: CommandRunner, O: Write, E, I>(
    args: &ShowCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    let node = orchestrator.registry().show_node(&args.name)?;
    if args.json {
        let view = NodeView {
            name: &node.name,
            node: &node,
        };
        writeln!(console.out, "{}", to_json(&view)?).ok();
        return Ok(0);
    }

    let key = orchestrator.registry().resolve_key(&node.name)?;
    let out = &mut console.out;
    writeln!(out, "Name:        {}", node.name).ok();
    writeln!(out, "IP:          {}", node.ip).ok();
    writeln!(out, "Role:        {}", node.role).ok();
    writeln!(out, "SSH user:    {}", node.ssh_user).ok();
    writeln!(
        out,
        "SSH key:     {}",
        key.as_ref().map_or("-", |path| path.as_str())
    )
    .ok();
    writeln!(out, "SID:         {}", node.sid.as_deref().unwrap_or("-")).ok();
    if let Some(ref base) = node.oracle_base {
        writeln!(out, "Oracle base: {base}").ok();
    }
    if let Some(ref home) = node.oracle_home {
        writeln!(out, "Oracle home: {home}").ok();
    }
    writeln!(out, "Status:      {}", node.status).ok();
    writeln!(out, "Added:       {}", node.added_at.to_rfc3339()).ok();
    for binding in &node.nfs_mounts {
        writeln!(
            out,
            "NFS mount:   {}:{} -> {}",
            binding.nfs_server, binding.remote_path, binding.mount_point
        )
        .ok();
    }
    Ok(0)
}

async fn add_nfs<S: TopologyStore, R: CommandRunner, O: Write, E: Write, I>(
    args: AddNfsCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    let spec = NodeSpec::new(args.name, args.ip, NodeRole::Nfs)
        .ssh_user(args.ssh_user)
        .ssh_key(args.ssh_key.map(Utf8PathBuf::from));
    let added = orchestrator.add_nfs_server(spec, &args.exports).await?;
    writeln!(
        console.out,
        "NFS server {} ({}) registered with exports: {}",
        added.server.name,
        added.server.ip,
        added.server.export_paths.join(", ")
    )
    .ok();
    report_reachability(console, added.reachable);
    Ok(0)
}

fn list_nfs<S: TopologyStore, R: CommandRunner, O: Write, E, I>(
    args: &ListNfsCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    let topology = orchestrator.registry().topology()?;
    if args.json {
        let views: Vec<NfsServerView<'_>> = topology
            .nfs_servers
            .iter()
            .map(|(name, server)| NfsServerView { name, server })
            .collect();
        writeln!(console.out, "{}", to_json(&views)?).ok();
        return Ok(0);
    }

    if topology.nfs_servers.is_empty() {
        writeln!(console.out, "No NFS servers registered").ok();
        return Ok(0);
    }
    for (name, server) in &topology.nfs_servers {
        writeln!(console.out, "{name} ({})", server.ip).ok();
        writeln!(console.out, "  exports: {}", server.export_paths.join(", ")).ok();
        let clients: Vec<&str> = server.clients.iter().map(String::as_str).collect();
        writeln!(console.out, "  clients: {}", join_or_dash(&clients)).ok();
        let stale = topology.stale_clients(name);
        if !stale.is_empty() {
            let stale_list: Vec<&str> = stale.iter().map(String::as_str).collect();
            writeln!(
                console.out,
                "  stale clients (no current mount): {}",
                stale_list.join(", ")
            )
            .ok();
        }
    }
    Ok(0)
}

fn join_or_dash(items: &[&str]) -> String {
    if items.is_empty() {
        String::from("-")
    } else {
        items.join(", ")
    }
}

fn mount_nfs<S: TopologyStore, R: CommandRunner, O: Write, E, I>(
    args: &MountNfsCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    let binding = orchestrator.registry().mount_nfs(
        &args.node,
        &args.nfs_server,
        &args.remote_path,
        &args.mount_point,
    )?;
    writeln!(
        console.out,
        "Recorded mount of {}:{} on {} at {}",
        binding.nfs_server, binding.remote_path, args.node, binding.mount_point
    )
    .ok();
    Ok(0)
}

async fn ssh<S: TopologyStore, R: CommandRunner, O: Write, E: Write, I>(
    args: &SshCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let command = render_remote_command(&args.command);
    let output = orchestrator.execute(&args.node, &command).await?;
    write_output(console, &output);
    Ok(output.exit_code)
}

async fn exec_all<S: TopologyStore, R: CommandRunner, O: Write, E: Write, I>(
    args: &ExecAllCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    validate_command_args(&args.command)?;
    let role = args
        .role
        .as_deref()
        .map(str::parse::<NodeRole>)
        .transpose()?;
    let names: Vec<String> = orchestrator
        .registry()
        .list_nodes(role)?
        .into_iter()
        .map(|node| node.name)
        .collect();
    if names.is_empty() {
        writeln!(console.out, "No matching nodes").ok();
        return Ok(0);
    }

    let command = render_remote_command(&args.command);
    let results = orchestrator.execute_many(&names, &command).await;
    let mut all_succeeded = true;
    for result in results {
        match result.outcome {
            Ok(output) => {
                writeln!(console.out, "== {} (exit {}) ==", result.node, output.exit_code).ok();
                all_succeeded &= output.is_success();
                write_output(console, &output);
            }
            Err(err) => {
                writeln!(console.out, "== {} (not run) ==", result.node).ok();
                writeln!(console.err, "{}: {err}", result.node).ok();
                all_succeeded = false;
            }
        }
    }
    Ok(i32::from(!all_succeeded))
}

async fn deploy<S: TopologyStore, R: CommandRunner, O: Write, E: Write, I>(
    node: &str,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    writeln!(console.out, "Deploying on {node}").ok();
    let outcome = orchestrator.deploy(node).await?;
    write_output(console, &outcome.output);
    if outcome.node.is_some() {
        writeln!(console.out, "Deployed successfully on {node}").ok();
        Ok(0)
    } else {
        writeln!(console.err, "Deployment failed on {node}").ok();
        Ok(outcome.output.exit_code.max(1))
    }
}

fn export<S: TopologyStore, R: CommandRunner, O: Write, E, I>(
    args: &ExportCommand,
    orchestrator: &ClusterOrchestrator<S, R>,
    console: &mut Console<O, E, I>,
) -> Result<i32, CliError> {
    let mut paths = Vec::new();
    if matches!(args.format.as_str(), "yaml" | "all") {
        paths.push(orchestrator.export_snapshot()?);
    }
    if matches!(args.format.as_str(), "ansible" | "all") {
        paths.push(orchestrator.export_automation_inventory()?);
    }
    for path in paths {
        writeln!(console.out, "Exported to {path}").ok();
    }
    Ok(0)
}

fn write_output<O: Write, E: Write, I>(
    console: &mut Console<O, E, I>,
    output: &RemoteCommandOutput,
) {
    console.out.write_all(output.stdout.as_bytes()).ok();
    console.err.write_all(output.stderr.as_bytes()).ok();
    if !output.stderr.is_empty() && !output.stderr.ends_with('\n') {
        writeln!(console.err).ok();
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|err| CliError::Render(err.to_string()))
}

/// Builds the remote command line. A single argument is a complete shell
/// command and is passed through; several arguments are quoted one by one.
fn render_remote_command(args: &[String]) -> String {
    if let [single] = args {
        return single.clone();
    }

    let mut result = String::new();
    let mut first = true;

    for arg in args {
        if first {
            first = false;
        } else {
            result.push(' ');
        }

        let escaped = escape(arg.as_str().into());
        result.push_str(escaped.as_ref());
    }

    result
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\u{0000}'..='\u{0008}' | '\u{000B}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters other than ",
                "tab and newline (ASCII 0x00-0x1F or 0x7F)"
            ))));
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
