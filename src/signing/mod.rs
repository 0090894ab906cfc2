//! Signing subsystem.
//!
//! # Data Flow
//! ```text
//! POST /sign/{format}
//!     → app.rs (format check, scratch dir, hash on worker pool)
//!     → script.rs (external sign script, passphrase on stdin)
//!     → signed bytes back to the caller
//! ```
//!
//! # Design Decisions
//! - The sign script is the only thing that touches key material
//! - Each request gets its own scratch directory, removed on every exit path
//! - Settings are swapped atomically on reload; requests in flight keep the
//!   snapshot they started with

pub mod app;
pub mod script;

pub use app::{AppSettings, FormatStats, SignError, SignedArtifact, SigningApp};
pub use script::{run_signscript, run_signscript_async, script_log_path, SignScriptError};
