//! Pidfile handling.
//!
//! The running daemon holds a [`PidFile`] guard for its whole lifetime;
//! control invocations only ever call [`read_pid`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Owns the on-disk pid record of this process.
///
/// Removed on drop, but only while it still names this process; a newer
/// daemon that has taken over the path keeps its file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Write the current process id to `path`.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let pid = std::process::id();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Write next to the target and rename so readers never see a partial pid.
        let tmp = path.with_extension("pid.tmp");
        fs::write(&tmp, format!("{pid}\n"))?;
        fs::rename(&tmp, &path)?;

        tracing::info!(path = %path.display(), pid = pid, "Pidfile written");
        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match read_pid(&self.path) {
            Some(pid) if pid == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pidfile");
                }
            }
            _ => {}
        }
    }
}

/// Read a pid from `path`.
///
/// A missing, unreadable or malformed file reads as `None`: the daemon is
/// treated as not running.
pub fn read_pid(path: &Path) -> Option<u32> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable pidfile");
            return None;
        }
    };

    // Signalling a non-positive pid targets a process group; never hand one out.
    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(pid as u32),
        _ => {
            tracing::warn!(path = %path.display(), "Malformed pidfile");
            None
        }
    }
}
