//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (startup.rs):
//!     Load config → Verify passphrases → [restart: stop old pid] → Detach
//!     → Runtime → Signal handlers → Pidfile → Hash workers → supervisor.rs
//!
//! Serving (supervisor.rs):
//!     signals.rs events → Reload (rebind what changed) | Shutdown
//!
//! Control invocations (control.rs):
//!     Pidfile → SIGINT (stop) | SIGHUP (reload) | SIGINT + wait (restart)
//! ```
//!
//! # Design Decisions
//! - Ordered startup: secrets first, then process state, then listeners
//! - A bad reload never leaves the daemon without a listener
//! - Restart waits for the old pid with a bounded timeout

pub mod control;
pub mod daemonize;
pub mod pidfile;
pub mod signals;
pub mod startup;
pub mod supervisor;

pub use control::{ControlError, ProcessController, SignalOutcome};
pub use pidfile::{read_pid, PidFile};
pub use signals::{control_channel, ControlEvent, ControlEvents, ControlHandle};
pub use startup::{launch, restart, start, verify, StartOptions, StartupError, VerifiedStart};
pub use supervisor::{ConsoleChange, ReloadOutcome, Supervisor, SupervisorError, SupervisorState};
