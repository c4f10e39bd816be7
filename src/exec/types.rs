//! Command runner abstraction and remote execution result types.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::process::Command;

use crate::topology_store::TopologyStoreError;

/// Result of running a local process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised by a [`CommandRunner`] before a process produced output.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned or its output collected.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the process outlived its deadline and was killed.
    #[error("{program} did not finish within {timeout:?}")]
    Timeout {
        /// Command that was killed.
        program: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
}

/// Future returned by [`CommandRunner::run`].
pub type RunnerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, RunnerError>> + Send + 'a>>;

/// Abstraction over process execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with `args`, capturing stdout and stderr, and gives up
    /// once `timeout` has elapsed.
    ///
    /// Dropping the returned future before it completes must stop the
    /// process.
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        timeout: Duration,
    ) -> RunnerFuture<'a>;
}

/// Real command runner that spawns processes on the host.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        timeout: Duration,
    ) -> RunnerFuture<'a> {
        Box::pin(async move {
            let child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| RunnerError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            let output = tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_elapsed| RunnerError::Timeout {
                    program: program.to_owned(),
                    timeout,
                })?
                .map_err(|err| RunnerError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Everything needed to reach one node over SSH.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Registry name of the node, used for logging and results.
    pub node: String,
    /// Address to connect to.
    pub host: String,
    /// Login user.
    pub user: String,
    /// Private key used for authentication.
    pub key_path: Utf8PathBuf,
}

/// Output of a remote command.
///
/// When the connection or authentication fails the output has exit code 1
/// and the diagnostic on stderr, and `failure` says which of the two
/// happened. Stdout is empty unless ssh exited 255 after the remote side had
/// already written some.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote command.
    pub exit_code: i32,
    /// Captured standard output stream.
    pub stdout: String,
    /// Captured standard error stream.
    pub stderr: String,
    /// Transport failure, if the command never ran.
    pub failure: Option<ExecutionError>,
}

impl RemoteCommandOutput {
    /// Builds the `(1, "", diagnostic)` result for a transport failure.
    #[must_use]
    pub fn transport_failure(failure: ExecutionError) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: failure.to_string(),
            failure: Some(failure),
        }
    }

    /// Returns `true` when the command ran and exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0 && self.failure.is_none()
    }
}

/// Errors surfaced by remote execution.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecutionError {
    /// Raised when the node is not registered.
    #[error("node {node} not found")]
    NodeNotFound {
        /// Requested node name.
        node: String,
    },
    /// Raised when the node has no stored SSH key.
    #[error("no SSH key configured for {node}")]
    NoCredential {
        /// Node without a key.
        node: String,
    },
    /// Raised when the SSH connection could not be established.
    #[error("connection to {host} failed: {message}")]
    ConnectionFailed {
        /// Address that was contacted.
        host: String,
        /// Diagnostic from the SSH client.
        message: String,
    },
    /// Raised when the host rejected the credentials.
    #[error("authentication as {user}@{host} failed: {message}")]
    AuthFailed {
        /// Address that was contacted.
        host: String,
        /// Login user.
        user: String,
        /// Diagnostic from the SSH client.
        message: String,
    },
    /// Raised when the command did not complete before its deadline.
    #[error("command on {node} timed out after {timeout:?}")]
    Timeout {
        /// Node the command ran on.
        node: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Raised when the topology could not be loaded to resolve the node.
    #[error(transparent)]
    Topology(#[from] TopologyStoreError),
}
