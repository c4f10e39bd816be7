//! Per-node SSH private key storage.
//!
//! Keys are copied into a single directory under a name derived from the node
//! name and restricted to owner read/write. The store does not encrypt
//! anything; it only owns the files.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::{debug, info};

use crate::files;
use crate::util::expand_home;

/// Name of the key directory inside the configuration directory.
pub const KEY_DIR_NAME: &str = "ssh_keys";

/// Suffix appended to the node name to form the stored key file name.
pub const KEY_FILE_SUFFIX: &str = "_rsa";

/// Errors raised by the credential store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Raised when the key to import does not exist.
    #[error("SSH key not found: {path}")]
    NotFound {
        /// Path that was supplied.
        path: Utf8PathBuf,
    },
    /// Raised when a node name cannot be turned into a key file name.
    #[error("cannot derive a key file name from node name {name:?}")]
    InvalidName {
        /// Offending node name.
        name: String,
    },
    /// Raised when copying, chmod or removal fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path involved in the failed operation.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Directory of private keys, one per node.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    dir: Utf8PathBuf,
}

impl CredentialStore {
    /// Creates a store rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store in the `ssh_keys` directory under `config_dir`.
    #[must_use]
    pub fn in_config_dir(config_dir: &Utf8Path) -> Self {
        Self::new(config_dir.join(KEY_DIR_NAME))
    }

    /// Directory holding the keys.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Key file name used for `node_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidName`] when the name is blank or
    /// would escape the key directory.
    pub fn key_name(node_name: &str) -> Result<String, CredentialError> {
        let trimmed = node_name.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed.starts_with('.') {
            return Err(CredentialError::InvalidName {
                name: node_name.to_owned(),
            });
        }
        Ok(format!("{trimmed}{KEY_FILE_SUFFIX}"))
    }

    /// Absolute path of a stored key.
    #[must_use]
    pub fn key_path(&self, key_name: &str) -> Utf8PathBuf {
        self.dir.join(key_name)
    }

    /// Copies the key at `source` into the store for `node_name` and returns
    /// the stored key name. An existing key for the same node is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] when `source` does not exist and
    /// [`CredentialError::Io`] when the copy or permission change fails.
    pub fn store_key(&self, node_name: &str, source: &Utf8Path) -> Result<String, CredentialError> {
        let key_name = Self::key_name(node_name)?;
        let expanded = expand_home(source.as_str());
        let present = files::exists(&expanded).map_err(|err| CredentialError::Io {
            path: expanded.clone(),
            message: err.to_string(),
        })?;
        if !present {
            return Err(CredentialError::NotFound { path: expanded });
        }

        let key_dir = files::ensure_dir(&self.dir).map_err(|err| io_error(&self.dir, &err))?;
        let (source_parent, source_name) =
            files::split(&expanded).map_err(|err| io_error(&expanded, &err))?;
        let source_dir = Dir::open_ambient_dir(source_parent, ambient_authority())
            .map_err(|err| io_error(source_parent, &err))?;

        let dest = self.key_path(&key_name);
        source_dir
            .copy(source_name, &key_dir, &key_name)
            .map_err(|err| io_error(&dest, &err))?;
        files::restrict_to_owner(&key_dir, &key_name).map_err(|err| io_error(&dest, &err))?;

        info!(node = node_name, key = %dest, "SSH key stored");
        Ok(key_name)
    }

    /// Removes the key stored for `node_name`. A missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Io`] when the file exists but cannot be
    /// removed.
    pub fn delete_key(&self, node_name: &str) -> Result<(), CredentialError> {
        let key_name = Self::key_name(node_name)?;
        let path = self.key_path(&key_name);
        let key_dir = match Dir::open_ambient_dir(&self.dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_error(&self.dir, &err)),
        };

        match key_dir.remove_file(&key_name) {
            Ok(()) => {
                debug!(node = node_name, key = %path, "SSH key removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&path, &err)),
        }
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> CredentialError {
    CredentialError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
