//! Controlling a running daemon through its pidfile.
//!
//! `stop` and `reload` are fire-and-forget signals. `restart` additionally
//! waits for the old process to disappear, probing liveness with signal 0
//! and backing off between checks, bounded by the stop timeout.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

use crate::lifecycle::pidfile::read_pid;
use crate::resilience::backoff::PollSchedule;

/// Default bound on how long `restart` waits for the old process.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to send {signal} to pid {pid}: {source}")]
    Signal {
        pid: u32,
        signal: Signal,
        source: Errno,
    },

    #[error("pid {pid} still running after {timeout:?}")]
    StopTimeout { pid: u32, timeout: Duration },

    #[error("interrupted while waiting for pid {pid} to exit")]
    Interrupted { pid: u32 },

    #[error("failed to start wait runtime: {0}")]
    Runtime(std::io::Error),
}

/// Result of signalling the daemon named by the pidfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The signal was delivered to this pid.
    Signalled(u32),
    /// No pidfile, or the recorded process no longer exists.
    NotRunning,
}

/// Liveness of `pid`, checked with signal 0.
///
/// `EPERM` means the process exists but belongs to someone else.
pub fn is_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(Errno::EPERM) => true,
        Err(e) => {
            tracing::warn!(pid = pid, error = %e, "Liveness check failed; assuming alive");
            true
        }
    }
}

/// Stop/reload/restart surface used by the CLI.
#[derive(Debug, Clone)]
pub struct ProcessController {
    pidfile: PathBuf,
    stop_timeout: Duration,
}

impl ProcessController {
    pub fn new(pidfile: impl Into<PathBuf>) -> Self {
        Self {
            pidfile: pidfile.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn pidfile(&self) -> &Path {
        &self.pidfile
    }

    /// Pid of a live daemon, if the pidfile names one.
    pub fn running_pid(&self) -> Option<u32> {
        read_pid(&self.pidfile).filter(|pid| is_alive(*pid))
    }

    /// Ask the daemon to shut down. Not running is success.
    pub fn stop(&self) -> Result<SignalOutcome, ControlError> {
        self.send(Signal::SIGINT)
    }

    /// Ask the daemon to re-read its configuration. Does not wait.
    pub fn reload(&self) -> Result<SignalOutcome, ControlError> {
        self.send(Signal::SIGHUP)
    }

    fn send(&self, signal: Signal) -> Result<SignalOutcome, ControlError> {
        let Some(pid) = read_pid(&self.pidfile) else {
            tracing::info!(pidfile = %self.pidfile.display(), "No pidfile; daemon not running");
            return Ok(SignalOutcome::NotRunning);
        };

        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) => {
                tracing::info!(pid = pid, signal = %signal, "Signal sent");
                Ok(SignalOutcome::Signalled(pid))
            }
            Err(Errno::ESRCH) => {
                tracing::info!(pid = pid, "Stale pidfile; daemon not running");
                Ok(SignalOutcome::NotRunning)
            }
            Err(source) => Err(ControlError::Signal { pid, signal, source }),
        }
    }

    /// Stop the daemon and wait until its pid is gone, or Ctrl-C arrives.
    pub async fn stop_and_wait(&self) -> Result<SignalOutcome, ControlError> {
        self.stop_and_wait_until(async {
            // An error here means Ctrl-C cannot be observed; keep waiting on the timeout alone.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Stop the daemon and wait until its pid is gone.
    ///
    /// Returns [`ControlError::Interrupted`] if `interrupt` completes first and
    /// [`ControlError::StopTimeout`] once the stop timeout has elapsed.
    pub async fn stop_and_wait_until<F>(&self, interrupt: F) -> Result<SignalOutcome, ControlError>
    where
        F: Future<Output = ()>,
    {
        let outcome = self.stop()?;
        let SignalOutcome::Signalled(pid) = outcome else {
            return Ok(outcome);
        };

        tokio::pin!(interrupt);
        let mut schedule = PollSchedule::new(self.stop_timeout);

        while is_alive(pid) {
            let Some(delay) = schedule.next() else {
                return Err(ControlError::StopTimeout {
                    pid,
                    timeout: self.stop_timeout,
                });
            };
            tracing::debug!(pid = pid, attempt = schedule.attempts(), delay = ?delay, "Waiting for exit");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut interrupt => return Err(ControlError::Interrupted { pid }),
            }
        }

        tracing::info!(pid = pid, "Previous daemon has exited");
        Ok(outcome)
    }

    /// Blocking variant of [`Self::stop_and_wait`] for use before any runtime exists.
    pub fn stop_and_wait_blocking(&self) -> Result<SignalOutcome, ControlError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ControlError::Runtime)?;
        runtime.block_on(self.stop_and_wait())
    }
}
