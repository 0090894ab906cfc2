//! Integrity hashing subsystem.
//!
//! # Data Flow
//! ```text
//! Request handler (async)
//!     → pool.rs submit(path) → job queue
//!     → hash worker thread (SHA-256, blocking I/O)
//!     → oneshot reply → awaiting handler
//! ```

pub mod pool;

pub use pool::{sha256_file, FileDigest, HashError, HashPool, PoolStats};
