//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every signing format has a passphrase check file
//! - Validate value ranges (ports, limits, retry counts)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::IpAddr;

use crate::config::schema::DaemonConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NoFormats,
    DuplicateFormat(String),
    InvalidFormatName(String),
    MissingTestfile(String),
    EmptySignscript,
    InvalidListenAddress(String),
    ZeroPort,
    BackdoorPortConflict(u16),
    ZeroValue(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::NoFormats => write!(f, "signing.formats must list at least one format"),
            ValidationError::DuplicateFormat(name) => write!(f, "format '{}' listed twice", name),
            ValidationError::InvalidFormatName(name) => write!(f, "invalid format name '{}'", name),
            ValidationError::MissingTestfile(name) => {
                write!(f, "missing signing.testfile_{} for format '{}'", name, name)
            }
            ValidationError::EmptySignscript => write!(f, "signing.signscript must not be empty"),
            ValidationError::InvalidListenAddress(addr) => {
                write!(f, "server.listen '{}' is not an IP address", addr)
            }
            ValidationError::ZeroPort => write!(f, "server.port must not be 0"),
            ValidationError::BackdoorPortConflict(port) => {
                write!(f, "server.backdoor_port {} collides with server.port", port)
            }
            ValidationError::ZeroValue(key) => write!(f, "{} must be greater than 0", key),
        }
    }
}

impl std::error::Error for ValidationError {}

fn is_valid_format_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.signing.formats.is_empty() {
        errors.push(ValidationError::NoFormats);
    }

    let mut seen = HashSet::new();
    for format in &config.signing.formats {
        if !seen.insert(format.as_str()) {
            errors.push(ValidationError::DuplicateFormat(format.clone()));
            continue;
        }
        if !is_valid_format_name(format) {
            errors.push(ValidationError::InvalidFormatName(format.clone()));
            continue;
        }
        if config.signing.testfile(format).is_none() {
            errors.push(ValidationError::MissingTestfile(format.clone()));
        }
    }

    if config.signing.signscript.as_os_str().is_empty() {
        errors.push(ValidationError::EmptySignscript);
    }

    if config.server.listen.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidListenAddress(config.server.listen.clone()));
    }

    // Port 0 would make the listen key meaningless for change detection.
    if config.server.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }

    if let Some(backdoor) = config.server.backdoor_port {
        if backdoor == 0 {
            errors.push(ValidationError::ZeroValue("server.backdoor_port"));
        } else if backdoor == config.server.port {
            errors.push(ValidationError::BackdoorPortConflict(backdoor));
        }
    }

    if config.server.max_connections == 0 {
        errors.push(ValidationError::ZeroValue("server.max_connections"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroValue("server.request_timeout_secs"));
    }
    if config.server.max_body_size == 0 {
        errors.push(ValidationError::ZeroValue("server.max_body_size"));
    }
    if config.signing.max_tries == 0 {
        errors.push(ValidationError::ZeroValue("signing.max_tries"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
