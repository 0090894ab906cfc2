//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → TraceLayer spans with x-request-id (http::server)
//!
//! Consumers:
//!     → stderr in the foreground, the -l log file when detached
//!     → the debug console for live counters
//! ```
//!
//! # Design Decisions
//! - Structured fields, never secrets
//! - Request ID flows through every signing request

pub mod logging;
