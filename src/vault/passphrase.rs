//! Verified signing passphrases held for the life of the process.
//!
//! # Security
//! - Secrets live only in memory; nothing here touches disk except the
//!   throwaway scratch copy of each format's test file
//! - Secrets are never logged; `Debug` output redacts them
//! - The vault is read-only once built

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use thiserror::Error;

use crate::config::DaemonConfig;
use crate::signing::script::{run_signscript, script_log_path, SignScriptError};

/// Errors that abort vault construction.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Reading the operator's input failed.
    #[error("failed to read {format} passphrase: {source}")]
    Prompt {
        format: String,
        source: std::io::Error,
    },

    /// A configured format has no test file.
    #[error("no test file configured for format {0}")]
    MissingTestfile(String),

    /// Creating or populating the scratch directory failed.
    #[error("failed to prepare {format} passphrase check: {source}")]
    Scratch {
        format: String,
        source: std::io::Error,
    },

    /// The sign script could not be run at all.
    #[error(transparent)]
    SignScript(#[from] SignScriptError),

    /// The sign script rejected the passphrase.
    #[error("bad {format} passphrase (sign script exited with {exit_code}): {log}")]
    BadPassphrase {
        format: String,
        exit_code: i32,
        log: String,
    },
}

/// Where passphrases come from during startup.
pub trait PassphraseSource {
    /// Return the secret for `format`; `None` means no passphrase is required.
    fn passphrase(&mut self, format: &str) -> Result<Option<SecretString>, VaultError>;
}

/// Mapping from signing format to its verified secret.
pub struct PassphraseVault {
    entries: HashMap<String, Option<SecretString>>,
    /// Formats in configured order.
    order: Vec<String>,
}

impl PassphraseVault {
    /// Prompt for and verify every configured format, in configured order.
    ///
    /// Any failure aborts the whole build; no partial vault is returned.
    pub fn build(
        config: &DaemonConfig,
        source: &mut dyn PassphraseSource,
    ) -> Result<Self, VaultError> {
        VaultBuilder::new(config).build(source)
    }

    /// Secret for `format`.
    ///
    /// `None` when the format is unknown; `Some(None)` when it needs no passphrase.
    pub fn get(&self, format: &str) -> Option<Option<&SecretString>> {
        self.entries.get(format).map(Option::as_ref)
    }

    pub fn contains(&self, format: &str) -> bool {
        self.entries.contains_key(format)
    }

    /// Formats in the order they were verified.
    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for PassphraseVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for format in &self.order {
            let shown = match self.entries.get(format) {
                Some(Some(_)) => "[REDACTED]",
                _ => "<none>",
            };
            map.entry(format, &shown);
        }
        map.finish()
    }
}

/// Builds a [`PassphraseVault`] against a configuration.
pub struct VaultBuilder<'a> {
    config: &'a DaemonConfig,
    scratch_root: Option<PathBuf>,
}

impl<'a> VaultBuilder<'a> {
    pub fn new(config: &'a DaemonConfig) -> Self {
        Self {
            config,
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn build(self, source: &mut dyn PassphraseSource) -> Result<PassphraseVault, VaultError> {
        let mut entries = HashMap::new();
        let mut order = Vec::new();

        for format in &self.config.signing.formats {
            let secret = source.passphrase(format)?;

            tracing::info!(format = %format, "Checking passphrase");
            self.verify(format, secret.as_ref())?;
            tracing::info!(format = %format, "Passphrase OK");

            entries.insert(format.clone(), secret);
            order.push(format.clone());
        }

        Ok(PassphraseVault { entries, order })
    }

    /// Sign the format's test file in a scratch directory.
    ///
    /// The directory is removed when this returns, on success and failure alike.
    fn verify(&self, format: &str, secret: Option<&SecretString>) -> Result<(), VaultError> {
        let src = self
            .config
            .signing
            .testfile(format)
            .ok_or_else(|| VaultError::MissingTestfile(format.to_string()))?;

        let scratch = self.scratch_dir(format)?;
        let file_name = src
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("testfile"));
        let dst = scratch.path().join(file_name);

        std::fs::copy(src, &dst).map_err(|source| VaultError::Scratch {
            format: format.to_string(),
            source,
        })?;

        let exit_code = run_signscript(
            &self.config.signing.signscript,
            src,
            &dst,
            src,
            format,
            secret,
            self.config.signing.max_tries,
        )?;

        if exit_code != 0 {
            let log = read_script_log(&dst);
            tracing::error!(format = %format, exit_code = exit_code, "Bad passphrase");
            return Err(VaultError::BadPassphrase {
                format: format.to_string(),
                exit_code,
                log,
            });
        }

        Ok(())
    }

    fn scratch_dir(&self, format: &str) -> Result<tempfile::TempDir, VaultError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("passphrase-check-");
        let dir = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|source| VaultError::Scratch {
            format: format.to_string(),
            source,
        })
    }
}

fn read_script_log(output: &Path) -> String {
    std::fs::read_to_string(script_log_path(output))
        .map(|log| log.trim().to_string())
        .unwrap_or_default()
}
