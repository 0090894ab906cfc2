//! Detaching from the controlling terminal.
//!
//! Must run while the process is still single-threaded: before the tokio
//! runtime is built and before the hash pool spawns its workers. `fork()`
//! only carries the calling thread into the child.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::unistd::{dup2, fork, setsid, ForkResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonizeError {
    #[error("fork failed: {0}")]
    Fork(nix::Error),

    #[error("setsid failed: {0}")]
    Setsid(nix::Error),

    #[error("failed to redirect stdio: {0}")]
    Stdio(io::Error),
}

/// Resolve `path` against the current directory.
///
/// Called on pidfile and log paths before detaching so they keep meaning the
/// same file whatever the daemon's working directory becomes.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Double fork and `setsid`, then point stdin/stdout/stderr at `/dev/null`.
///
/// Returns in the grandchild only; both parents exit with status 0. The
/// working directory is kept so relative paths in the configuration resolve
/// as they did at startup.
#[allow(unsafe_code)] // fork() requires unsafe
pub fn daemonize() -> Result<(), DaemonizeError> {
    // SAFETY: no runtime or worker thread exists yet, so the child inherits
    // a consistent single-threaded process.
    match unsafe { fork() }.map_err(DaemonizeError::Fork)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(DaemonizeError::Setsid)?;

    // SAFETY: still single-threaded; the second fork drops session
    // leadership so a terminal can never be reacquired.
    match unsafe { fork() }.map_err(DaemonizeError::Fork)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    redirect_stdio()
}

fn redirect_stdio() -> Result<(), DaemonizeError> {
    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .map_err(DaemonizeError::Stdio)?;

    let targets = [
        io::stdin().as_raw_fd(),
        io::stdout().as_raw_fd(),
        io::stderr().as_raw_fd(),
    ];
    for target in targets {
        dup2(devnull.as_raw_fd(), target)
            .map_err(|e| DaemonizeError::Stdio(io::Error::from(e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_become_absolute() {
        let resolved = absolute_path(Path::new("signing.pid")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("signing.pid"));

        let fixed = absolute_path(Path::new("/run/signing.pid")).unwrap();
        assert_eq!(fixed, PathBuf::from("/run/signing.pid"));
    }
}
