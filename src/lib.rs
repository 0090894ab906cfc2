//! Passphrase-verified signing daemon library

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod signing;

// Secrets and CPU-bound work
pub mod hashing;
pub mod vault;

// Cross-cutting concerns
pub mod console;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::DaemonConfig;
pub use lifecycle::{ProcessController, Supervisor};
pub use signing::SigningApp;
pub use vault::PassphraseVault;
