//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → connection.rs (lifecycle tracking)
//!     → binding.rs (per-connection HTTP/1.1 + HTTP/2 task)
//!     → Hand off to the router (signing app or debug console)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Binding identity is the configured (address, port) pair
//! - A binding is bound first and served second, so a replacement can be
//!   confirmed before the old one is stopped

pub mod binding;
pub mod connection;
pub mod listener;

pub use binding::{DebugConsoleBinding, ListenerBinding};
pub use listener::{Listener, ListenerError};
