//! The reload supervisor.
//!
//! # States
//! ```text
//! Initializing → Serving → (Reloading → Serving)* → ShuttingDown
//! ```
//!
//! # Reload
//! The configuration is re-read from the same path. The signing listener and
//! the debug console are compared independently against what is bound:
//! unchanged endpoints are left alone, changed ones are bound fresh first and
//! only then is the old one stopped. Any failure before that point abandons
//! the reload and keeps serving the previous configuration. The signing app
//! gets the new configuration in place; the vault is never touched.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{load_config, ConfigError, DaemonConfig, ListenKey};
use crate::console::{
    console_key, create_console, ConsoleState, EndpointSnapshot, ServerSnapshot,
    CONSOLE_MAX_CONNECTIONS,
};
use crate::hashing::HashPool;
use crate::http::create_server;
use crate::lifecycle::signals::{ControlEvent, ControlEvents};
use crate::net::{DebugConsoleBinding, Listener, ListenerBinding, ListenerError};
use crate::signing::SigningApp;
use crate::vault::PassphraseVault;

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Serving,
    Reloading,
    ShuttingDown,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Initializing => "initializing",
            SupervisorState::Serving => "serving",
            SupervisorState::Reloading => "reloading",
            SupervisorState::ShuttingDown => "shutting_down",
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("failed to install signal handlers: {0}")]
    Signals(std::io::Error),
}

/// What happened to the debug console during a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleChange {
    Unchanged,
    Started,
    Replaced,
    Stopped,
}

/// Summary of an applied reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub listener_replaced: bool,
    pub console: ConsoleChange,
}

/// Console action decided in the prepare phase of a reload.
enum ConsolePlan {
    Keep,
    Install(DebugConsoleBinding),
    Remove,
}

/// Owns everything the serving loop needs: the app, the active bindings and
/// the console snapshot.
pub struct Supervisor {
    config_path: PathBuf,
    app: Arc<SigningApp>,
    console_state: ConsoleState,
    binding: Option<ListenerBinding>,
    console: Option<DebugConsoleBinding>,
    state: SupervisorState,
    reloads: u64,
    failed_reloads: u64,
}

impl Supervisor {
    /// Load configuration, build the app and bind every configured endpoint.
    ///
    /// Any failure here is fatal; nothing is left listening.
    pub async fn start(
        config_path: impl Into<PathBuf>,
        vault: Arc<PassphraseVault>,
        hash_pool: Arc<HashPool>,
    ) -> Result<Self, SupervisorError> {
        let config_path = config_path.into();
        tracing::info!(path = %config_path.display(), "Loading configuration");
        let config = load_config(&config_path)?;

        let app = Arc::new(SigningApp::new(&config, vault, hash_pool));
        let console_state = ConsoleState::new(Arc::clone(&app));

        let listener = Listener::bind(&config.listen_key(), config.server.max_connections)?;
        let console_listener = match config.server.backdoor_port {
            Some(port) => Some(Listener::bind(&console_key(port), CONSOLE_MAX_CONNECTIONS)?),
            None => None,
        };

        let binding = create_server(Arc::clone(&app), listener)?;
        let console = match console_listener {
            Some(listener) => {
                tracing::info!(port = listener.key().port, "Starting debug console");
                Some(create_console(console_state.clone(), listener)?)
            }
            None => None,
        };

        let mut supervisor = Self {
            config_path,
            app,
            console_state,
            binding: Some(binding),
            console,
            state: SupervisorState::Initializing,
            reloads: 0,
            failed_reloads: 0,
        };
        supervisor.set_state(SupervisorState::Serving);
        Ok(supervisor)
    }

    /// Serve until a shutdown event arrives.
    pub async fn run(mut self, mut events: ControlEvents) {
        tracing::info!(pid = std::process::id(), "Running");
        loop {
            match events.next().await {
                ControlEvent::Reload => {
                    // Failures are logged inside; the previous configuration stays live.
                    let _ = self.reload().await;
                }
                ControlEvent::Shutdown => break,
            }
        }
        self.shutdown().await;
    }

    /// Re-read configuration and apply only what changed.
    pub async fn reload(&mut self) -> Result<ReloadOutcome, SupervisorError> {
        self.set_state(SupervisorState::Reloading);
        tracing::info!(path = %self.config_path.display(), "Reloading configuration");

        let result = self.apply_reload().await;
        match &result {
            Ok(outcome) => {
                self.reloads += 1;
                tracing::info!(
                    listener_replaced = outcome.listener_replaced,
                    console = ?outcome.console,
                    "Reload complete"
                );
            }
            Err(e) => {
                self.failed_reloads += 1;
                tracing::error!(error = %e, "Reload failed; keeping previous configuration");
            }
        }

        self.set_state(SupervisorState::Serving);
        result
    }

    async fn apply_reload(&mut self) -> Result<ReloadOutcome, SupervisorError> {
        let config = load_config(&self.config_path)?;

        // Prepare: bind and start serving whatever changed. A failure here
        // stops anything already prepared, so a failed reload leaves no trace.
        let new_binding = self.prepare_listener(&config)?;
        let console_plan = match self.prepare_console(&config) {
            Ok(plan) => plan,
            Err(e) => {
                if let Some(binding) = new_binding {
                    binding.stop().await;
                }
                return Err(e.into());
            }
        };

        // Commit: infallible from here on.
        self.app.load_config(&config);

        let listener_replaced = match new_binding {
            Some(binding) => {
                if let Some(old) = self.binding.replace(binding) {
                    tracing::info!(
                        old = %old.key(),
                        new = %config.listen_key(),
                        "Listening address has changed, stopping old server"
                    );
                    old.stop().await;
                }
                true
            }
            None => false,
        };

        let console = self.commit_console(console_plan).await;

        Ok(ReloadOutcome {
            listener_replaced,
            console,
        })
    }

    fn prepare_listener(&self, config: &DaemonConfig) -> Result<Option<ListenerBinding>, ListenerError> {
        let wanted = config.listen_key();
        match &self.binding {
            Some(current) if *current.key() == wanted => Ok(None),
            _ => {
                let listener = Listener::bind(&wanted, config.server.max_connections)?;
                create_server(Arc::clone(&self.app), listener).map(Some)
            }
        }
    }

    fn prepare_console(&self, config: &DaemonConfig) -> Result<ConsolePlan, ListenerError> {
        let current = self.console.as_ref().map(|c| c.key().port);
        match (current, config.server.backdoor_port) {
            (Some(current), Some(wanted)) if current == wanted => Ok(ConsolePlan::Keep),
            (_, Some(wanted)) => {
                let listener = Listener::bind(&console_key(wanted), CONSOLE_MAX_CONNECTIONS)?;
                create_console(self.console_state.clone(), listener).map(ConsolePlan::Install)
            }
            (Some(_), None) => Ok(ConsolePlan::Remove),
            (None, None) => Ok(ConsolePlan::Keep),
        }
    }

    async fn commit_console(&mut self, plan: ConsolePlan) -> ConsoleChange {
        match plan {
            ConsolePlan::Keep => ConsoleChange::Unchanged,
            ConsolePlan::Install(console) => {
                let port = console.key().port;
                let change = match self.console.replace(console) {
                    Some(old) => {
                        tracing::info!(port = old.key().port, "Stopping old debug console");
                        old.stop().await;
                        ConsoleChange::Replaced
                    }
                    None => ConsoleChange::Started,
                };
                tracing::info!(port = port, "Starting debug console");
                change
            }
            ConsolePlan::Remove => {
                if let Some(old) = self.console.take() {
                    tracing::info!(port = old.key().port, "Debug console removed from configuration");
                    old.stop().await;
                }
                ConsoleChange::Stopped
            }
        }
    }

    /// Stop accepting on every binding. Open connections are not drained.
    pub async fn shutdown(mut self) {
        self.set_state(SupervisorState::ShuttingDown);
        if let Some(console) = self.console.take() {
            console.stop().await;
        }
        if let Some(binding) = self.binding.take() {
            binding.stop().await;
        }
        tracing::info!(pid = std::process::id(), "Exiting normally");
    }

    fn set_state(&mut self, state: SupervisorState) {
        tracing::debug!(from = self.state.as_str(), to = state.as_str(), "Supervisor transition");
        self.state = state;
        self.console_state.publish(ServerSnapshot {
            state,
            reloads: self.reloads,
            failed_reloads: self.failed_reloads,
            signing: self.binding.as_ref().map(EndpointSnapshot::of),
        });
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn app(&self) -> &Arc<SigningApp> {
        &self.app
    }

    pub fn console_state(&self) -> &ConsoleState {
        &self.console_state
    }

    /// Configured key of the active signing listener.
    pub fn listen_key(&self) -> Option<&ListenKey> {
        self.binding.as_ref().map(ListenerBinding::key)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.binding.as_ref().map(ListenerBinding::local_addr)
    }

    pub fn console_addr(&self) -> Option<SocketAddr> {
        self.console.as_ref().map(ListenerBinding::local_addr)
    }

    pub fn is_accepting(&self) -> bool {
        self.binding.as_ref().is_some_and(ListenerBinding::is_accepting)
    }

    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    pub fn failed_reloads(&self) -> u64 {
        self.failed_reloads
    }
}
