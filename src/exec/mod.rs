//! Remote command execution over the system `ssh` client.
//!
//! The executor never resolves node names itself; callers hand it a fully
//! resolved [`SshTarget`]. Connection and authentication failures come back
//! as output with exit code 1 and a `failure` classification, while a command
//! that outlives its deadline is an [`ExecutionError::Timeout`].

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8Path;
use futures::stream::{self, StreamExt};
use shell_escape::unix::escape;
use tracing::{debug, warn};

mod ssh;
mod types;

pub use ssh::{
    DEFAULT_SSH_BIN, DEFAULT_SSH_PORT, HostKeyPolicy, SSH_TRANSPORT_FAILURE, SshOptions,
    UnknownHostKeyPolicy,
};
pub use types::{
    CommandOutput, CommandRunner, ExecutionError, ProcessCommandRunner, RemoteCommandOutput,
    RunnerError, RunnerFuture, SshTarget,
};

/// Deadline for the connectivity check run when a node is registered.
pub const DEFAULT_CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for an ordinary remote command.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Command run by [`RemoteExecutor::test_connection`].
pub const CONNECTION_CHECK_COMMAND: &str = "true";

/// Result of one node's execution within a fleet run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FleetResult {
    /// Node the command was aimed at.
    pub node: String,
    /// Output, or the reason no output exists.
    pub outcome: Result<RemoteCommandOutput, ExecutionError>,
}

/// Runs commands on remote hosts through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct RemoteExecutor<R: CommandRunner> {
    options: SshOptions,
    runner: R,
}

impl RemoteExecutor<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub const fn with_process_runner(options: SshOptions) -> Self {
        Self::new(options, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteExecutor<R> {
    /// Creates an executor using the provided runner.
    #[must_use]
    pub const fn new(options: SshOptions, runner: R) -> Self {
        Self { options, runner }
    }

    /// Returns the SSH client settings.
    #[must_use]
    pub const fn options(&self) -> &SshOptions {
        &self.options
    }

    /// Returns the underlying runner.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Checks that `host` accepts `user` with the key at `key_path` by
    /// running a no-op command.
    ///
    /// Never fails: every problem is logged as a warning and reported as
    /// `false`.
    pub async fn test_connection(
        &self,
        host: &str,
        user: &str,
        key_path: &Utf8Path,
        timeout: Duration,
    ) -> bool {
        let target = SshTarget {
            node: host.to_owned(),
            host: host.to_owned(),
            user: user.to_owned(),
            key_path: key_path.to_path_buf(),
        };
        match self.execute(&target, CONNECTION_CHECK_COMMAND, timeout).await {
            Ok(output) if output.is_success() => true,
            Ok(output) => {
                warn!(
                    host,
                    user,
                    exit_code = output.exit_code,
                    stderr = output.stderr.trim(),
                    "SSH connectivity check failed"
                );
                false
            }
            Err(err) => {
                warn!(host, user, error = %err, "SSH connectivity check failed");
                false
            }
        }
    }

    /// Runs `command` on `target` and returns its raw output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Timeout`] when the command does not finish
    /// within `timeout`. Transport failures are reported through
    /// [`RemoteCommandOutput::failure`] instead.
    pub async fn execute(
        &self,
        target: &SshTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteCommandOutput, ExecutionError> {
        let args = self.options.command_args(target, command);
        debug!(
            node = %target.node,
            command = %render_command(&self.options.ssh_bin, &args),
            "running remote command"
        );

        match self.runner.run(&self.options.ssh_bin, &args, timeout).await {
            Ok(output) => Ok(ssh::classify(target, output)),
            Err(RunnerError::Timeout { timeout: elapsed, .. }) => Err(ExecutionError::Timeout {
                node: target.node.clone(),
                timeout: elapsed,
            }),
            Err(err @ RunnerError::Spawn { .. }) => Ok(RemoteCommandOutput::transport_failure(
                ExecutionError::ConnectionFailed {
                    host: target.host.clone(),
                    message: err.to_string(),
                },
            )),
        }
    }

    /// Runs `command` on every target, at most `limit` at a time.
    ///
    /// Results arrive in completion order, not input order. A `limit` of zero
    /// is treated as one.
    pub async fn execute_many(
        &self,
        targets: &[SshTarget],
        command: &str,
        timeout: Duration,
        limit: usize,
    ) -> Vec<FleetResult> {
        stream::iter(targets)
            .map(|target| async move {
                FleetResult {
                    node: target.node.clone(),
                    outcome: self.execute(target, command, timeout).await,
                }
            })
            .buffer_unordered(limit.max(1))
            .collect()
            .await
    }
}

/// Renders a program and its arguments as a copy-pasteable shell line.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(escape(program.into()).into_owned());
    parts.extend(
        args.iter()
            .map(|arg| escape(arg.to_string_lossy()).into_owned()),
    );
    parts.join(" ")
}
