//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGHUP, SIGINT, SIGTERM)
//! - Translate signals to control events
//! - Hand the supervisor one event at a time
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered once, before the supervisor starts serving, so
//!   a signal delivered between two reload cycles is never lost
//! - Reloads coalesce into a single pending slot; a burst of SIGHUPs produces
//!   one reload, not many
//! - Shutdown is sticky and wins over a pending reload

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// What the supervisor should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Re-read configuration and apply the differences.
    Reload,
    /// Leave the serving loop.
    Shutdown,
}

struct Shared {
    reload: Notify,
    shutdown: watch::Sender<bool>,
}

/// Sending side of the control channel. Cheap to clone.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    /// Request a reload. Coalesces with a reload that is already pending.
    pub fn reload(&self) {
        self.shared.reload.notify_one();
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }
}

/// Receiving side of the control channel, owned by the supervisor.
pub struct ControlEvents {
    shared: Arc<Shared>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ControlEvents {
    /// Wait for the next control event.
    ///
    /// Consuming a reload re-arms the slot in the same step, so a reload
    /// requested while the previous one is being applied is delivered on the
    /// next call.
    pub async fn next(&mut self) -> ControlEvent {
        if *self.shutdown_rx.borrow_and_update() {
            return ControlEvent::Shutdown;
        }

        tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => ControlEvent::Shutdown,
            _ = self.shared.reload.notified() => ControlEvent::Reload,
        }
    }
}

/// Create a linked handle/events pair.
pub fn control_channel() -> (ControlHandle, ControlEvents) {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let shared = Arc::new(Shared {
        reload: Notify::new(),
        shutdown,
    });
    (
        ControlHandle {
            shared: Arc::clone(&shared),
        },
        ControlEvents { shared, shutdown_rx },
    )
}

/// Forward SIGHUP as reload and SIGINT/SIGTERM as shutdown.
///
/// Registration happens before this returns; the forwarding task runs until
/// the runtime stops.
pub fn install_signal_handlers(handle: ControlHandle) -> std::io::Result<JoinHandle<()>> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = hangup.recv() => {
                    tracing::info!("SIGHUP received, scheduling reload");
                    handle.reload();
                }
                Some(()) = interrupt.recv() => {
                    tracing::info!("SIGINT received, shutting down");
                    handle.shutdown();
                }
                Some(()) = terminate.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                    handle.shutdown();
                }
                else => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn reload_requests_coalesce() {
        let (handle, mut events) = control_channel();
        handle.reload();
        handle.reload();
        handle.reload();

        assert_eq!(events.next().await, ControlEvent::Reload);
        let second = tokio::time::timeout(Duration::from_millis(50), events.next()).await;
        assert!(second.is_err(), "burst should produce a single reload");
    }

    #[tokio::test]
    async fn reload_during_processing_is_kept() {
        let (handle, mut events) = control_channel();
        handle.reload();
        assert_eq!(events.next().await, ControlEvent::Reload);

        // Arrives while the first reload is being applied.
        handle.reload();
        assert_eq!(events.next().await, ControlEvent::Reload);
    }

    #[tokio::test]
    async fn shutdown_wins_and_sticks() {
        let (handle, mut events) = control_channel();
        handle.reload();
        handle.shutdown();

        assert_eq!(events.next().await, ControlEvent::Shutdown);
        assert_eq!(events.next().await, ControlEvent::Shutdown);
    }

    #[tokio::test]
    async fn sighup_delivers_reload() {
        let (handle, mut events) = control_channel();
        let _task = install_signal_handlers(handle).unwrap();

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("reload event");
        assert_eq!(event, ControlEvent::Reload);
    }
}
