//! Owned listening endpoints.
//!
//! A binding is one bound [`Listener`] plus the accept task serving a router
//! on it. Its identity is the configured (address, port) pair. Stopping a
//! binding closes the listening socket; connections that were already
//! accepted keep running on their own tasks until the peer goes away.

use std::net::SocketAddr;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ListenKey;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};

/// A running listener for the signing endpoint or the debug console.
#[derive(Debug)]
pub struct ListenerBinding {
    name: &'static str,
    key: ListenKey,
    local_addr: SocketAddr,
    tracker: ConnectionTracker,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The debug console uses the same machinery, keyed by its loopback port.
pub type DebugConsoleBinding = ListenerBinding;

impl ListenerBinding {
    /// Start accepting on `listener`, serving `router` on every connection.
    pub fn serve(name: &'static str, listener: Listener, router: Router) -> Result<Self, ListenerError> {
        let key = listener.key().clone();
        let local_addr = listener
            .local_addr()
            .map_err(|e| ListenerError::Bind(key.clone(), e))?;
        let tracker = ConnectionTracker::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(accept_loop(name, listener, router, tracker.clone(), stop_rx));

        tracing::info!(binding = name, address = %local_addr, "Serving");

        Ok(Self {
            name,
            key,
            local_addr,
            tracker,
            stop_tx,
            task,
        })
    }

    pub fn key(&self) -> &ListenKey {
        &self.key
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connection counters, usable after the binding is gone.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Whether the accept loop is still running.
    pub fn is_accepting(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop accepting and wait until the listening socket is closed.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(binding = self.name, error = %e, "Accept task ended abnormally");
        }
        tracing::info!(
            binding = self.name,
            address = %self.local_addr,
            remaining_connections = self.tracker.active_count(),
            "Stopped accepting"
        );
    }
}

async fn accept_loop(
    name: &'static str,
    listener: Listener,
    router: Router,
    tracker: ConnectionTracker,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = stop_rx.changed() => break,
        };

        let (stream, peer_addr, permit) = match accepted {
            Ok(conn) => conn,
            Err(ListenerError::Closed) => break,
            Err(e) => {
                // Usually EMFILE; back off instead of spinning.
                tracing::warn!(binding = name, error = %e, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                continue;
            }
        };

        let guard = tracker.track();
        let service = TowerToHyperService::new(router.clone());

        tokio::spawn(async move {
            let _permit = permit;
            let builder = auto::Builder::new(TokioExecutor::new());
            let io = TokioIo::new(stream);
            if let Err(e) = builder.serve_connection(io, service).await {
                tracing::debug!(
                    connection_id = %guard.id(),
                    peer_addr = %peer_addr,
                    error = %e,
                    "Connection ended with error"
                );
            }
            drop(guard);
        });
    }
    // Dropping the listener here closes the socket.
}
