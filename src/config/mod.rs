//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!
//! On reload signal:
//!     supervisor re-reads the same path
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → bindings replaced only where the listen key changed
//!     → SigningApp swaps its settings snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - Optional knobs have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{DaemonConfig, ListenKey, ServerConfig, SigningConfig};
pub use validation::ValidationError;
