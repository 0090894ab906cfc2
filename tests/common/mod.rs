//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use signing_daemon::config::load_config;
use signing_daemon::hashing::HashPool;
use signing_daemon::vault::{PassphraseSource, PassphraseVault, VaultError};

/// Sign script that appends a marker to the input, and rejects the passphrase "wrong".
pub const STUB_SIGNSCRIPT: &str = r#"
read -r pass || true
if [ "$pass" = "wrong" ]; then
    echo "bad passphrase for $1" >&2
    exit 1
fi
cat "$2" > "$3"
printf 'signed-%s' "$1" >> "$3"
"#;

/// Write an executable shell script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A signing daemon configuration rooted in a temporary directory.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub config_path: PathBuf,
    pub signscript: PathBuf,
}

impl Fixture {
    /// Test files for `gpg` and `mar` plus the stub sign script.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let signscript = write_script(dir.path(), "signscript.sh", STUB_SIGNSCRIPT);
        std::fs::write(dir.path().join("test.bin"), b"gpg test artifact").unwrap();
        std::fs::write(dir.path().join("test.mar"), b"mar test artifact").unwrap();
        let config_path = dir.path().join("signing.toml");

        Self {
            dir,
            config_path,
            signscript,
        }
    }

    /// Write the config file. `extra_server` is appended to `[server]` verbatim.
    pub fn write_config(&self, port: u16, backdoor_port: Option<u16>, extra_server: &str) {
        let backdoor = backdoor_port
            .map(|p| format!("backdoor_port = {p}\n"))
            .unwrap_or_default();
        let text = format!(
            r#"
[server]
listen = "127.0.0.1"
port = {port}
{backdoor}{extra_server}

[signing]
formats = "gpg, mar"
signscript = "{script}"
testfile_gpg = "{gpg}"
testfile_mar = "{mar}"
max_tries = 1
"#,
            script = self.signscript.display(),
            gpg = self.dir.path().join("test.bin").display(),
            mar = self.dir.path().join("test.mar").display(),
        );
        std::fs::write(&self.config_path, text).unwrap();
    }

    /// Replace the config file with text that fails to parse.
    pub fn write_broken_config(&self) {
        std::fs::write(&self.config_path, "[server\nport = ").unwrap();
    }

    /// Build a vault from the current config with the given secrets.
    pub fn vault(&self, secrets: &[(&str, &str)]) -> Arc<PassphraseVault> {
        let config = load_config(&self.config_path).unwrap();
        let mut source = FixedPassphrases::new(secrets);
        Arc::new(PassphraseVault::build(&config, &mut source).unwrap())
    }

    pub fn pidfile(&self) -> PathBuf {
        self.dir.path().join("signing.pid")
    }
}

/// Passphrases supplied up front instead of typed at a terminal.
pub struct FixedPassphrases(HashMap<String, String>);

impl FixedPassphrases {
    pub fn new(secrets: &[(&str, &str)]) -> Self {
        Self(
            secrets
                .iter()
                .map(|(format, secret)| (format.to_string(), secret.to_string()))
                .collect(),
        )
    }
}

impl PassphraseSource for FixedPassphrases {
    fn passphrase(&mut self, format: &str) -> Result<Option<SecretString>, VaultError> {
        Ok(self
            .0
            .get(format)
            .filter(|p| !p.is_empty())
            .map(|p| SecretString::from(p.clone())))
    }
}

pub fn hash_pool() -> Arc<HashPool> {
    Arc::new(HashPool::new(2).unwrap())
}

/// Non-pooled client so every request opens a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
