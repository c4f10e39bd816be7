//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::exec::{CommandOutput, CommandRunner, RunnerError, RunnerFuture};

type Response = Result<CommandOutput, RunnerError>;

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Response>,
    by_host: HashMap<String, VecDeque<Response>>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner that returns pre-seeded outputs.
///
/// Responses queued for a specific host (see [`ScriptedRunner::push_for_host`])
/// are used for invocations whose `user@host` argument names that host; all
/// other invocations consume the shared queue in FIFO order. Clones share the
/// same script, so a test can keep a handle after moving the runner into an
/// executor.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    script: Arc<StdMutex<Script>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Deadline the caller asked for.
    pub timeout: Duration,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the last argument, which for SSH invocations is the remote
    /// command.
    #[must_use]
    pub fn remote_command(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.lock().invocations.clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.lock().responses.push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }

    /// Pushes a runner timeout.
    pub fn push_timeout(&self) {
        self.lock().responses.push_back(Err(RunnerError::Timeout {
            program: String::from("ssh"),
            timeout: Duration::from_secs(30),
        }));
    }

    /// Pushes a spawn failure.
    pub fn push_spawn_error(&self, message: impl Into<String>) {
        self.lock().responses.push_back(Err(RunnerError::Spawn {
            program: String::from("ssh"),
            message: message.into(),
        }));
    }

    /// Queues an output used only for invocations that target `host`.
    pub fn push_for_host(
        &self,
        host: impl Into<String>,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.lock()
            .by_host
            .entry(host.into())
            .or_default()
            .push_back(Ok(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            }));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_response(&self, program: &str, args: &[OsString], timeout: Duration) -> Response {
        let mut script = self.lock();
        script.invocations.push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            timeout,
        });

        let host_queue = args
            .iter()
            .filter_map(|arg| arg.to_str())
            .filter_map(|arg| arg.split_once('@').map(|(_, host)| host.to_owned()))
            .find(|host| script.by_host.contains_key(host));
        let scripted = match host_queue {
            Some(host) => script
                .by_host
                .get_mut(&host)
                .and_then(VecDeque::pop_front),
            None => script.responses.pop_front(),
        };
        scripted.unwrap_or_else(|| {
            Err(RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        timeout: Duration,
    ) -> RunnerFuture<'a> {
        let response = self.next_response(program, args, timeout);
        Box::pin(async move { response })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
