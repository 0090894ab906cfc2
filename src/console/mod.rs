//! Loopback debug console.
//!
//! A small JSON router bound to `127.0.0.1:<backdoor_port>` that exposes the
//! supervisor's current snapshot (state, active binding, reload count) and
//! the signing app's counters. Never exposes secrets.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{routing::get, Router};

use crate::config::ListenKey;
use crate::lifecycle::supervisor::SupervisorState;
use crate::net::connection::ConnectionTracker;
use crate::net::{DebugConsoleBinding, Listener, ListenerBinding, ListenerError};
use crate::signing::SigningApp;
use self::handlers::*;

/// Address the console always binds to.
pub const CONSOLE_ADDRESS: &str = "127.0.0.1";

/// Connection limit for the console listener.
pub const CONSOLE_MAX_CONNECTIONS: usize = 16;

/// Listen key for a console on `port`.
pub fn console_key(port: u16) -> ListenKey {
    ListenKey {
        address: CONSOLE_ADDRESS.to_string(),
        port,
    }
}

/// The signing endpoint as last seen by the supervisor.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub key: ListenKey,
    pub local_addr: SocketAddr,
    pub tracker: ConnectionTracker,
}

impl EndpointSnapshot {
    pub fn of(binding: &ListenerBinding) -> Self {
        Self {
            key: binding.key().clone(),
            local_addr: binding.local_addr(),
            tracker: binding.tracker(),
        }
    }
}

/// Supervisor state published to the console after every transition.
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub state: SupervisorState,
    pub reloads: u64,
    pub failed_reloads: u64,
    pub signing: Option<EndpointSnapshot>,
}

impl Default for ServerSnapshot {
    fn default() -> Self {
        Self {
            state: SupervisorState::Initializing,
            reloads: 0,
            failed_reloads: 0,
            signing: None,
        }
    }
}

struct ConsoleInner {
    app: Arc<SigningApp>,
    server: ArcSwap<ServerSnapshot>,
    started: Instant,
}

/// Shared state behind the console router.
#[derive(Clone)]
pub struct ConsoleState {
    inner: Arc<ConsoleInner>,
}

impl ConsoleState {
    pub fn new(app: Arc<SigningApp>) -> Self {
        Self {
            inner: Arc::new(ConsoleInner {
                app,
                server: ArcSwap::from_pointee(ServerSnapshot::default()),
                started: Instant::now(),
            }),
        }
    }

    pub fn publish(&self, snapshot: ServerSnapshot) {
        self.inner.server.store(Arc::new(snapshot));
    }

    pub fn server(&self) -> Arc<ServerSnapshot> {
        self.inner.server.load_full()
    }

    pub fn app(&self) -> &Arc<SigningApp> {
        &self.inner.app
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started.elapsed().as_secs()
    }
}

pub fn setup_console_router(state: ConsoleState) -> Router {
    Router::new()
        .route("/debug/status", get(get_status))
        .route("/debug/app", get(get_app))
        .route("/debug/pool", get(get_pool))
        .with_state(state)
}

/// Serve the console on an already-bound loopback listener.
pub fn create_console(state: ConsoleState, listener: Listener) -> Result<DebugConsoleBinding, ListenerError> {
    ListenerBinding::serve("console", listener, setup_console_router(state))
}
