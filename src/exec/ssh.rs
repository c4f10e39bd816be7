//! `ssh` client invocation: argument building and classification of the
//! client's exit status.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use super::types::{CommandOutput, ExecutionError, RemoteCommandOutput, SshTarget};

/// Default path of the SSH client binary.
pub const DEFAULT_SSH_BIN: &str = "ssh";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Exit status the OpenSSH client uses for its own failures.
pub const SSH_TRANSPORT_FAILURE: i32 = 255;

const AUTH_FAILURE_MARKERS: [&str; 2] = ["Permission denied", "Too many authentication failures"];

/// How unknown host keys are treated.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HostKeyPolicy {
    /// Accept and remember a host key seen for the first time; reject a
    /// changed one.
    #[default]
    TrustOnFirstUse,
    /// Only connect to hosts already present in the known-hosts file.
    Strict,
}

impl HostKeyPolicy {
    /// Value passed as `StrictHostKeyChecking`.
    #[must_use]
    pub const fn ssh_option(self) -> &'static str {
        match self {
            Self::TrustOnFirstUse => "accept-new",
            Self::Strict => "yes",
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TrustOnFirstUse => "trust-on-first-use",
            Self::Strict => "strict",
        })
    }
}

/// Raised when a host key policy name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown host key policy {0:?}: expected trust-on-first-use or strict")]
pub struct UnknownHostKeyPolicy(
    /// The rejected input.
    pub String,
);

impl FromStr for HostKeyPolicy {
    type Err = UnknownHostKeyPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trust-on-first-use" | "tofu" | "accept-new" => Ok(Self::TrustOnFirstUse),
            "strict" | "yes" => Ok(Self::Strict),
            _ => Err(UnknownHostKeyPolicy(value.to_owned())),
        }
    }
}

/// Client-side settings applied to every SSH invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshOptions {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Port to connect to.
    pub port: u16,
    /// Deadline for establishing the connection, passed as `ConnectTimeout`.
    pub connect_timeout: Duration,
    /// Treatment of unknown host keys.
    pub host_key_policy: HostKeyPolicy,
    /// Known hosts file override; `None` keeps the client default.
    pub known_hosts_file: Option<String>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_bin: DEFAULT_SSH_BIN.to_owned(),
            port: DEFAULT_SSH_PORT,
            connect_timeout: super::DEFAULT_CONNECTION_CHECK_TIMEOUT,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_file: None,
        }
    }
}

impl SshOptions {
    /// Builds the argument list that runs `command` on `target`.
    ///
    /// The command string is passed as a single argument; the remote shell
    /// interprets it.
    #[must_use]
    pub fn command_args(&self, target: &SshTarget, command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.port.to_string()),
            OsString::from("-i"),
            OsString::from(target.key_path.as_str()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            )),
            OsString::from("-o"),
            OsString::from(format!(
                "StrictHostKeyChecking={}",
                self.host_key_policy.ssh_option()
            )),
        ];

        if let Some(known_hosts) = self
            .known_hosts_file
            .as_deref()
            .filter(|path| !path.trim().is_empty())
        {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!("UserKnownHostsFile={known_hosts}")));
        }

        args.push(OsString::from(format!("{}@{}", target.user, target.host)));
        args.push(OsString::from(command));
        args
    }
}

/// Maps the client's process output onto a [`RemoteCommandOutput`].
///
/// Exit status 255 and a missing exit status mean the command never ran; the
/// diagnostic on stderr decides between an authentication and a connection
/// failure. Every other status is the remote command's own.
///
/// A remote command that itself exits 255 is indistinguishable from a
/// transport failure, so whatever it wrote to stdout is kept on the result.
pub(crate) fn classify(target: &SshTarget, output: CommandOutput) -> RemoteCommandOutput {
    match output.code {
        Some(code) if code != SSH_TRANSPORT_FAILURE => RemoteCommandOutput {
            exit_code: code,
            stdout: output.stdout,
            stderr: output.stderr,
            failure: None,
        },
        Some(_) => RemoteCommandOutput {
            stdout: output.stdout,
            ..RemoteCommandOutput::transport_failure(transport_error(target, &output.stderr))
        },
        None => RemoteCommandOutput::transport_failure(ExecutionError::ConnectionFailed {
            host: target.host.clone(),
            message: non_empty_or(&output.stderr, "ssh terminated without an exit status"),
        }),
    }
}

fn transport_error(target: &SshTarget, stderr: &str) -> ExecutionError {
    let message = non_empty_or(stderr, "ssh exited with status 255");
    if AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
    {
        ExecutionError::AuthFailed {
            host: target.host.clone(),
            user: target.user.clone(),
            message,
        }
    } else {
        ExecutionError::ConnectionFailed {
            host: target.host.clone(),
            message,
        }
    }
}

fn non_empty_or(text: &str, fallback: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        fallback.to_owned()
    } else {
        trimmed.to_owned()
    }
}
