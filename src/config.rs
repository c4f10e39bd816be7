//! Configuration loading via `ortho-config`.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::{DEFAULT_SSH_BIN, DEFAULT_SSH_PORT, HostKeyPolicy, SshOptions};
use crate::orchestrator::OrchestratorSettings;
use crate::topology::DEFAULT_CLUSTER_NAME;
use crate::util::expand_home;

/// Default configuration directory holding the topology and the keys.
pub const DEFAULT_CONFIG_DIR: &str = "~/.oracledba";

/// Script run on a node by the deploy workflow.
pub const DEFAULT_DEPLOY_SCRIPT: &str = "cd /root && rm -rf oracledba && \
git clone https://github.com/ELMRABET-Abdelali/oracledba.git && \
cd oracledba && sudo bash install.sh";

/// Cluster settings derived from defaults, configuration files and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ORACLUSTER",
    discovery(
        app_name = "oracluster",
        env_var = "ORACLUSTER_CONFIG_PATH",
        config_file_name = "oracluster.toml",
        dotfile_name = ".oracluster.toml",
        project_file_name = "oracluster.toml"
    )
)]
pub struct ClusterConfig {
    /// Directory holding `cluster.yaml`, the key store and exports. Supports
    /// tilde expansion.
    #[ortho_config(default = DEFAULT_CONFIG_DIR.to_owned())]
    pub config_dir: String,
    /// Label written into a newly created topology document.
    #[ortho_config(default = DEFAULT_CLUSTER_NAME.to_owned())]
    pub cluster_name: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = DEFAULT_SSH_BIN.to_owned())]
    pub ssh_bin: String,
    /// Port used for every SSH connection.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Seconds allowed for establishing a connection and for the
    /// registration connection check.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u64,
    /// Seconds a remote command may run before it is killed.
    #[ortho_config(default = 30)]
    pub ssh_exec_timeout_secs: u64,
    /// Whether to refuse hosts missing from the known-hosts file. When
    /// disabled, new host keys are accepted on first use and changed keys
    /// are still rejected.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; empty keeps the SSH client default.
    #[ortho_config(default = String::new())]
    pub ssh_known_hosts_file: String,
    /// Whether `add-node` checks the SSH connection to the new node.
    #[ortho_config(default = true)]
    pub check_connection_on_add: bool,
    /// Maximum number of nodes contacted at once by fleet commands.
    #[ortho_config(default = 8)]
    pub fleet_concurrency: usize,
    /// Shell script run on a node by `deploy`.
    #[ortho_config(default = DEFAULT_DEPLOY_SCRIPT.to_owned())]
    pub deploy_script: String,
    /// Seconds the deploy script may run before it is killed.
    #[ortho_config(default = 3600)]
    pub deploy_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            config_dir: DEFAULT_CONFIG_DIR.to_owned(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_owned(),
            ssh_bin: DEFAULT_SSH_BIN.to_owned(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_connect_timeout_secs: 10,
            ssh_exec_timeout_secs: 30,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::new(),
            check_connection_on_add: true,
            fleet_concurrency: 8,
            deploy_script: DEFAULT_DEPLOY_SCRIPT.to_owned(),
            deploy_timeout_secs: 3600,
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to oracluster.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

impl ClusterConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(metadata.missing());
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("oracluster")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// or a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.config_dir,
            &FieldMetadata::new(
                "configuration directory",
                "ORACLUSTER_CONFIG_DIR",
                "config_dir",
            ),
        )?;
        Self::require_field(
            &self.cluster_name,
            &FieldMetadata::new("cluster name", "ORACLUSTER_CLUSTER_NAME", "cluster_name"),
        )?;
        Self::require_field(
            &self.ssh_bin,
            &FieldMetadata::new("SSH client path", "ORACLUSTER_SSH_BIN", "ssh_bin"),
        )?;
        Self::require_positive(
            self.ssh_connect_timeout_secs,
            &FieldMetadata::new(
                "SSH connect timeout",
                "ORACLUSTER_SSH_CONNECT_TIMEOUT_SECS",
                "ssh_connect_timeout_secs",
            ),
        )?;
        Self::require_positive(
            self.ssh_exec_timeout_secs,
            &FieldMetadata::new(
                "SSH command timeout",
                "ORACLUSTER_SSH_EXEC_TIMEOUT_SECS",
                "ssh_exec_timeout_secs",
            ),
        )?;
        Self::require_field(
            &self.deploy_script,
            &FieldMetadata::new("deploy script", "ORACLUSTER_DEPLOY_SCRIPT", "deploy_script"),
        )?;
        Self::require_positive(
            self.deploy_timeout_secs,
            &FieldMetadata::new(
                "deploy timeout",
                "ORACLUSTER_DEPLOY_TIMEOUT_SECS",
                "deploy_timeout_secs",
            ),
        )?;
        Ok(())
    }

    /// Configuration directory with a leading `~` expanded.
    #[must_use]
    pub fn config_dir_path(&self) -> Utf8PathBuf {
        expand_home(self.config_dir.trim())
    }

    /// Deadline for the registration connection check.
    #[must_use]
    pub const fn connection_check_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }

    /// Deadline for ordinary remote commands.
    #[must_use]
    pub const fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_exec_timeout_secs)
    }

    /// Orchestrator settings derived from this configuration.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            check_connection_on_add: self.check_connection_on_add,
            connection_check_timeout: self.connection_check_timeout(),
            exec_timeout: self.exec_timeout(),
            deploy_timeout: Duration::from_secs(self.deploy_timeout_secs),
            deploy_script: self.deploy_script.clone(),
            fleet_concurrency: self.fleet_concurrency,
        }
    }

    /// SSH client settings derived from this configuration.
    #[must_use]
    pub fn ssh_options(&self) -> SshOptions {
        let known_hosts = self.ssh_known_hosts_file.trim();
        SshOptions {
            ssh_bin: self.ssh_bin.clone(),
            port: self.ssh_port,
            connect_timeout: self.connection_check_timeout(),
            host_key_policy: if self.ssh_strict_host_key_checking {
                HostKeyPolicy::Strict
            } else {
                HostKeyPolicy::TrustOnFirstUse
            },
            known_hosts_file: (!known_hosts.is_empty()).then(|| expand_home(known_hosts).into_string()),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
