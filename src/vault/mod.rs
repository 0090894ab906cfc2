//! Passphrase vault subsystem.
//!
//! # Data Flow
//! ```text
//! Startup only:
//!     prompt.rs (operator enters secret, echo off)
//!     → passphrase.rs (copy test file to scratch dir, run sign script)
//!     → PassphraseVault (format → secret, read-only)
//!     → shared via Arc with the SigningApp
//! ```
//!
//! # Design Decisions
//! - Built before any listener exists; a wrong passphrase aborts startup
//! - Never mutated after construction, so no locking
//! - Reload never touches the vault

pub mod passphrase;
pub mod prompt;

pub use passphrase::{PassphraseSource, PassphraseVault, VaultBuilder, VaultError};
pub use prompt::TerminalPrompt;
