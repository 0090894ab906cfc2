//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the signing
//! daemon. All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of the per-format passphrase check file keys in `[signing]`.
pub const TESTFILE_PREFIX: &str = "testfile_";

/// Root configuration for the signing daemon.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DaemonConfig {
    /// Listener configuration (address, port, debug console).
    pub server: ServerConfig,

    /// Signing formats and the external sign script.
    pub signing: SigningConfig,
}

impl DaemonConfig {
    /// The (address, port) pair the signing endpoint binds to.
    pub fn listen_key(&self) -> ListenKey {
        ListenKey {
            address: self.server.listen.clone(),
            port: self.server.port,
        }
    }
}

/// Identity of a listening endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ListenKey {
    pub address: String,
    pub port: u16,
}

impl std::fmt::Display for ListenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0").
    pub listen: String,

    /// Port to listen on.
    pub port: u16,

    /// Optional loopback port for the debug console.
    #[serde(default)]
    pub backdoor_port: Option<u16>,

    /// Maximum concurrent connections (backpressure).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Deadline for a single signing request in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_max_connections() -> usize {
    256
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_body_size() -> usize {
    512 * 1024 * 1024 // 512MB
}

/// `[signing]` section.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SigningConfig {
    /// Enumerated signing formats, in prompt order.
    #[serde(deserialize_with = "deserialize_formats")]
    pub formats: Vec<String>,

    /// Path to the external sign script.
    pub signscript: PathBuf,

    /// Sign script attempts when verifying a passphrase.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Remaining keys; `testfile_<format>` entries live here.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl SigningConfig {
    /// Passphrase check file configured for `format`.
    pub fn testfile(&self, format: &str) -> Option<&Path> {
        self.extra
            .get(&format!("{}{}", TESTFILE_PREFIX, format))
            .map(Path::new)
    }
}

fn default_max_tries() -> u32 {
    2
}

/// Accepts either `"gpg, mar"` or `["gpg", "mar"]`.
fn deserialize_formats<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Formats {
        List(Vec<String>),
        Csv(String),
    }

    let raw = match Formats::deserialize(deserializer)? {
        Formats::List(list) => list,
        Formats::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };

    Ok(raw
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect())
}
