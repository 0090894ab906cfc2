//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! restart:
//!     → lifecycle::control (signal old pid, check liveness)
//!     → backoff.rs (next delay, clamped to the stop timeout)
//! ```
//!
//! # Design Decisions
//! - Waiting is always bounded; no caller polls forever
//! - Jitter keeps concurrent waiters from probing in lockstep

pub mod backoff;
