//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::binding)
//!     → server.rs (request ID, tracing, routing)
//!     → signing app (hash, sign)
//!     → Send signed bytes to client
//! ```

pub mod server;

pub use server::{build_router, create_server, X_SHA256};
