//! Startup orchestration.
//!
//! # Responsibilities
//! - Load configuration and verify every passphrase ([`verify`])
//! - Detach, build the runtime and register signal handlers ([`launch`])
//! - Write the pidfile and start the hash workers
//! - Hand over to the reload supervisor until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal and nothing is left listening
//! - A restart only stops the running daemon once passphrases are verified
//! - Everything that must not be inherited across `fork()` (threads, the
//!   runtime, listeners) is created after detaching
//! - The pidfile appears only after SIGHUP and SIGINT are handled

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{load_config, ConfigError};
use crate::hashing::HashPool;
use crate::lifecycle::daemonize::{absolute_path, daemonize, DaemonizeError};
use crate::lifecycle::control::{ControlError, ProcessController, SignalOutcome};
use crate::lifecycle::pidfile::PidFile;
use crate::lifecycle::signals::{control_channel, install_signal_handlers};
use crate::lifecycle::supervisor::{Supervisor, SupervisorError};
use crate::vault::{PassphraseSource, PassphraseVault, VaultError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("passphrase verification failed: {0}")]
    Vault(#[from] VaultError),

    #[error("failed to detach: {0}")]
    Daemonize(#[from] DaemonizeError),

    #[error("failed to write pidfile {path}: {source}")]
    Pidfile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start hash workers: {0}")]
    HashPool(std::io::Error),

    #[error("failed to build runtime: {0}")]
    Runtime(std::io::Error),

    #[error("failed to stop running daemon: {0}")]
    Control(#[from] ControlError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Everything `start` needs from the command line.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub config_path: PathBuf,
    pub pidfile: PathBuf,
    pub daemonize: bool,
}

/// A configuration whose passphrases have all been checked.
///
/// Produced by [`verify`]; nothing outside this process has been touched yet.
#[derive(Debug)]
pub struct VerifiedStart {
    config_path: PathBuf,
    pidfile_path: PathBuf,
    daemonize: bool,
    vault: PassphraseVault,
}

/// Load the configuration and verify every format's passphrase.
pub fn verify(options: &StartOptions, source: &mut dyn PassphraseSource) -> Result<VerifiedStart, StartupError> {
    let config_path = absolute_path(&options.config_path).map_err(ConfigError::Io)?;
    let pidfile_path = absolute_path(&options.pidfile).map_err(|source| StartupError::Pidfile {
        path: options.pidfile.clone(),
        source,
    })?;

    let config = load_config(&config_path)?;
    let vault = PassphraseVault::build(&config, source)?;
    tracing::info!(formats = vault.len(), "Passphrases verified");

    Ok(VerifiedStart {
        config_path,
        pidfile_path,
        daemonize: options.daemonize,
        vault,
    })
}

/// Detach if asked and serve until shutdown.
///
/// The pidfile is removed on every exit path after it was written.
pub fn launch(verified: VerifiedStart) -> Result<(), StartupError> {
    let VerifiedStart {
        config_path,
        pidfile_path,
        daemonize: detach,
        vault,
    } = verified;

    if detach {
        tracing::info!("Detaching from terminal");
        daemonize()?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;

    runtime.block_on(async move {
        let (handle, events) = control_channel();
        let _signals = install_signal_handlers(handle).map_err(SupervisorError::Signals)?;

        let _pidfile = PidFile::create(&pidfile_path).map_err(|source| StartupError::Pidfile {
            path: pidfile_path.clone(),
            source,
        })?;

        let hash_pool = HashPool::with_available_parallelism().map_err(StartupError::HashPool)?;
        tracing::info!(workers = hash_pool.size(), "Hash workers started");

        let supervisor = Supervisor::start(config_path, Arc::new(vault), Arc::new(hash_pool)).await?;
        supervisor.run(events).await;
        Ok::<_, StartupError>(())
    })
}

/// Run the start sequence to completion.
///
/// Returns once the supervisor has shut down.
pub fn start(options: &StartOptions, source: &mut dyn PassphraseSource) -> Result<(), StartupError> {
    launch(verify(options, source)?)
}

/// Replace the daemon recorded in `controller`'s pidfile.
///
/// Passphrases are verified first; a failure there leaves the running
/// daemon untouched.
pub fn restart(
    options: &StartOptions,
    controller: &ProcessController,
    source: &mut dyn PassphraseSource,
) -> Result<(), StartupError> {
    let verified = verify(options, source)?;
    if let SignalOutcome::Signalled(pid) = controller.stop_and_wait_blocking()? {
        tracing::info!(pid = pid, "Previous daemon stopped");
    }
    launch(verified)
}
