//! Operator passphrase prompt with terminal echo disabled.

use std::io::{self, BufRead, Write};

use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg, Termios};
use secrecy::SecretString;

use crate::vault::passphrase::{PassphraseSource, VaultError};

/// Reads passphrases from the controlling terminal.
///
/// Falls back to a plain line read when stdin is not a terminal, so
/// passphrases can be piped in by a supervisor script.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl PassphraseSource for TerminalPrompt {
    fn passphrase(&mut self, format: &str) -> Result<Option<SecretString>, VaultError> {
        let line = prompt_hidden_input(&format!("{} passphrase: ", format))
            .map_err(|source| VaultError::Prompt {
                format: format.to_string(),
                source,
            })?;

        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(SecretString::from(line)))
        }
    }
}

/// Restores the saved terminal attributes on drop.
struct EchoGuard {
    original: Termios,
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        if tcsetattr(io::stdin(), SetArg::TCSANOW, &self.original).is_err() {
            tracing::warn!("Failed to restore terminal echo after passphrase prompt");
        }
    }
}

fn prompt_hidden_input(prompt: &str) -> io::Result<String> {
    let mut stderr = io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;

    let original = match tcgetattr(io::stdin()) {
        Ok(termios) => termios,
        Err(_) => return read_line(),
    };

    let mut silent = original.clone();
    silent.local_flags.remove(LocalFlags::ECHO);
    if tcsetattr(io::stdin(), SetArg::TCSANOW, &silent).is_err() {
        return read_line();
    }

    let guard = EchoGuard { original };
    let line = read_line();
    drop(guard);

    // Newline was not echoed while ECHO was disabled.
    let _ = writeln!(stderr);

    line
}

fn read_line() -> io::Result<String> {
    let mut input = String::new();
    let read = io::stdin().lock().read_line(&mut input)?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdin closed before a passphrase was entered",
        ));
    }
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}
