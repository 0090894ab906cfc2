//! The long-lived signing application.
//!
//! One `SigningApp` exists per process. Reloads re-apply configuration to it
//! in place through [`SigningApp::load_config`]; the vault and the hash pool it
//! was built with are never replaced.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::config::DaemonConfig;
use crate::hashing::{FileDigest, HashError, HashPool};
use crate::signing::script::{run_signscript_async, script_log_path, SignScriptError};
use crate::vault::PassphraseVault;

/// Errors from a single signing request.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("format {0} is not available")]
    UnknownFormat(String),

    #[error("scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    SignScript(#[from] SignScriptError),

    #[error("sign script exited with {exit_code}: {log}")]
    ScriptFailed { exit_code: i32, log: String },
}

/// The reloadable part of the configuration as seen by the app.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppSettings {
    pub formats: Vec<String>,
    pub signscript: PathBuf,
    pub max_tries: u32,
    #[serde(rename = "request_timeout_secs", serialize_with = "serialize_secs")]
    pub request_timeout: Duration,
    pub max_body_size: usize,
}

fn serialize_secs<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

impl From<&DaemonConfig> for AppSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            formats: config.signing.formats.clone(),
            signscript: config.signing.signscript.clone(),
            max_tries: config.signing.max_tries,
            request_timeout: config.server.request_timeout(),
            max_body_size: config.server.max_body_size,
        }
    }
}

/// A signed artifact ready to return to the client.
#[derive(Debug)]
pub struct SignedArtifact {
    /// Digest of the uploaded (unsigned) artifact.
    pub digest: FileDigest,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct FormatCounters {
    signed: AtomicU64,
    failed: AtomicU64,
}

/// Per-format request counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FormatStats {
    pub format: String,
    pub signed: u64,
    pub failed: u64,
}

pub struct SigningApp {
    vault: Arc<PassphraseVault>,
    hash_pool: Arc<HashPool>,
    settings: ArcSwap<AppSettings>,
    counters: DashMap<String, FormatCounters>,
    config_loads: AtomicU64,
}

impl SigningApp {
    pub fn new(config: &DaemonConfig, vault: Arc<PassphraseVault>, hash_pool: Arc<HashPool>) -> Self {
        let app = Self {
            vault,
            hash_pool,
            settings: ArcSwap::from_pointee(AppSettings::from(config)),
            counters: DashMap::new(),
            config_loads: AtomicU64::new(1),
        };
        app.warn_unverified_formats();
        app
    }

    /// Re-apply configuration. Idempotent; the vault is left alone.
    pub fn load_config(&self, config: &DaemonConfig) {
        let next = AppSettings::from(config);
        if *self.settings.load_full() != next {
            tracing::info!(formats = ?next.formats, "Signing settings updated");
        }
        self.settings.store(Arc::new(next));
        self.config_loads.fetch_add(1, Ordering::Relaxed);
        self.warn_unverified_formats();
    }

    fn warn_unverified_formats(&self) {
        for format in &self.settings.load().formats {
            if !self.vault.contains(format) {
                tracing::warn!(
                    format = %format,
                    "Format has no verified passphrase; restart to enable it"
                );
            }
        }
    }

    pub fn settings(&self) -> Arc<AppSettings> {
        self.settings.load_full()
    }

    pub fn vault(&self) -> &Arc<PassphraseVault> {
        &self.vault
    }

    pub fn hash_pool(&self) -> &Arc<HashPool> {
        &self.hash_pool
    }

    /// Number of times configuration has been applied, including construction.
    pub fn config_loads(&self) -> u64 {
        self.config_loads.load(Ordering::Relaxed)
    }

    /// Formats that are both configured and unlocked.
    pub fn available_formats(&self) -> Vec<String> {
        self.settings
            .load()
            .formats
            .iter()
            .filter(|f| self.vault.contains(f))
            .cloned()
            .collect()
    }

    pub fn is_available(&self, format: &str) -> bool {
        self.vault.contains(format) && self.settings.load().formats.iter().any(|f| f == format)
    }

    pub fn stats(&self) -> Vec<FormatStats> {
        let mut stats: Vec<FormatStats> = self
            .counters
            .iter()
            .map(|entry| FormatStats {
                format: entry.key().clone(),
                signed: entry.value().signed.load(Ordering::Relaxed),
                failed: entry.value().failed.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by(|a, b| a.format.cmp(&b.format));
        stats
    }

    /// Sign `body` as `format`.
    pub async fn sign(&self, format: &str, body: Bytes) -> Result<SignedArtifact, SignError> {
        if !self.is_available(format) {
            return Err(SignError::UnknownFormat(format.to_string()));
        }

        let result = self.sign_inner(format, body).await;

        let counters = self.counters.entry(format.to_string()).or_default();
        match &result {
            Ok(_) => counters.signed.fetch_add(1, Ordering::Relaxed),
            Err(_) => counters.failed.fetch_add(1, Ordering::Relaxed),
        };

        result
    }

    async fn sign_inner(&self, format: &str, body: Bytes) -> Result<SignedArtifact, SignError> {
        let settings = self.settings.load_full();
        let scratch = tempfile::Builder::new().prefix("sign-").tempdir()?;
        let input = scratch.path().join("unsigned");
        let output = scratch.path().join("signed");

        tokio::fs::write(&input, &body).await?;
        let digest = self.hash_pool.submit(&input).await?;

        tracing::debug!(format = %format, sha256 = %digest, size = body.len(), "Signing artifact");

        // Dropping this future (request timeout) kills the script.
        let exit_code = run_signscript_async(
            &settings.signscript,
            &input,
            &output,
            &input,
            format,
            self.vault.get(format).flatten(),
            settings.max_tries,
        )
        .await?;

        if exit_code != 0 {
            let log = tokio::fs::read_to_string(script_log_path(&output))
                .await
                .unwrap_or_default();
            return Err(SignError::ScriptFailed {
                exit_code,
                log: log.trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(&output).await?;
        tracing::info!(format = %format, sha256 = %digest, "Artifact signed");

        Ok(SignedArtifact { digest, bytes })
    }
}

impl std::fmt::Debug for SigningApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningApp")
            .field("vault", &self.vault)
            .field("settings", &self.settings.load_full())
            .finish_non_exhaustive()
    }
}
