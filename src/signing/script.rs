//! External sign script invocation.
//!
//! The script is called as `<script> <format> <input> <output> <original>`.
//! The passphrase, when one is set, is written to its stdin followed by a
//! newline. Everything the script prints goes to `<output>.out`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Failures that prevent the sign script from producing an exit code.
#[derive(Debug, Error)]
pub enum SignScriptError {
    #[error("failed to create script log {path}: {source}")]
    Log {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to run sign script {script}: {source}")]
    Spawn {
        script: PathBuf,
        source: std::io::Error,
    },
}

/// Path of the log file that captures the script's output for `output`.
pub fn script_log_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".out");
    PathBuf::from(name)
}

fn open_log(log_path: &Path) -> Result<(File, File), SignScriptError> {
    let log_err = |source| SignScriptError::Log {
        path: log_path.to_path_buf(),
        source,
    };
    let log = File::create(log_path).map_err(log_err)?;
    let log_dup = log.try_clone().map_err(log_err)?;
    Ok((log, log_dup))
}

/// `<script> <format> <input> <output> <original>` with stdin piped and
/// stdout/stderr going to a fresh `<output>.out`.
fn signscript_command(
    script: &Path,
    input: &Path,
    output: &Path,
    original: &Path,
    format: &str,
) -> Result<Command, SignScriptError> {
    let (log, log_dup) = open_log(&script_log_path(output))?;
    let mut command = Command::new(script);
    command
        .arg(format)
        .arg(input)
        .arg(output)
        .arg(original)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_dup));
    Ok(command)
}

fn spawn_error(script: &Path) -> impl FnOnce(std::io::Error) -> SignScriptError + '_ {
    move |source| SignScriptError::Spawn {
        script: script.to_path_buf(),
        source,
    }
}

fn log_failed_attempt(format: &str, attempt: u32, max_tries: u32, exit_code: i32) {
    tracing::warn!(
        format = %format,
        attempt = attempt,
        max_tries = max_tries,
        exit_code = exit_code,
        "Sign script failed"
    );
}

/// Run the sign script up to `max_tries` times, stopping at the first zero exit.
///
/// Returns the last exit code seen; `-1` when the script was killed by a signal.
/// Blocks the calling thread; used before the runtime exists.
pub fn run_signscript(
    script: &Path,
    input: &Path,
    output: &Path,
    original: &Path,
    format: &str,
    passphrase: Option<&SecretString>,
    max_tries: u32,
) -> Result<i32, SignScriptError> {
    let mut code = -1;

    for attempt in 1..=max_tries.max(1) {
        let mut child = signscript_command(script, input, output, original, format)?
            .spawn()
            .map_err(spawn_error(script))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(secret) = passphrase {
                // The script may exit without reading stdin; a broken pipe is
                // reported through its exit code instead.
                let _ = stdin
                    .write_all(secret.expose_secret().as_bytes())
                    .and_then(|_| stdin.write_all(b"\n"));
            }
        }

        let status = child.wait().map_err(spawn_error(script))?;
        code = status.code().unwrap_or(-1);

        if code == 0 {
            break;
        }
        log_failed_attempt(format, attempt, max_tries, code);
    }

    Ok(code)
}

/// Async form of [`run_signscript`] for the request path.
///
/// The child is killed if the returned future is dropped, so a request that
/// times out never leaves a script running against its removed scratch
/// directory.
pub async fn run_signscript_async(
    script: &Path,
    input: &Path,
    output: &Path,
    original: &Path,
    format: &str,
    passphrase: Option<&SecretString>,
    max_tries: u32,
) -> Result<i32, SignScriptError> {
    let mut code = -1;

    for attempt in 1..=max_tries.max(1) {
        let mut command = tokio::process::Command::from(signscript_command(
            script, input, output, original, format,
        )?);
        let mut child = command
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error(script))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(secret) = passphrase {
                let _ = async {
                    stdin.write_all(secret.expose_secret().as_bytes()).await?;
                    stdin.write_all(b"\n").await
                }
                .await;
            }
        }

        let status = child.wait().await.map_err(spawn_error(script))?;
        code = status.code().unwrap_or(-1);

        if code == 0 {
            break;
        }
        log_failed_attempt(format, attempt, max_tries, code);
    }

    Ok(code)
}
