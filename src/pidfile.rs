//! Advisory single-instance PID file
//!
//! On start the binary records its PID. A second instance refuses to start
//! while the recorded process is alive and its `/proc/<pid>/cmdline` names
//! the same program. Stale or unreadable files are overwritten. The file is
//! removed when the [`PidFile`] guard drops, if it still holds our PID.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::PidFileError;

/// Guard for an acquired PID file
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Claim `path` for the current process.
    ///
    /// `program` is matched against the command line of any PID already
    /// recorded there.
    ///
    /// # Errors
    ///
    /// Returns `PidFileError::AlreadyRunning` if a live `program` instance owns
    /// the file, `PidFileError::Io` if it cannot be written.
    pub fn acquire(path: impl Into<PathBuf>, program: &str) -> Result<Self, PidFileError> {
        let path = path.into();

        if let Some(pid) = read_pid(&path)? {
            if is_instance_alive(pid, program) {
                return Err(PidFileError::AlreadyRunning { pid, path });
            }
            info!("Removing stale PID file {} (pid {})", path.display(), pid);
        }

        let pid = std::process::id();
        fs::write(&path, format!("{pid}\n")).map_err(|source| PidFileError::Io {
            path: path.clone(),
            source,
        })?;

        debug!("Wrote PID {} to {}", pid, path.display());
        Ok(Self { path, pid })
    }

    /// Location of the PID file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the file
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Another instance may have replaced a file it considered stale
        match read_pid(&self.path) {
            Ok(Some(pid)) if pid == self.pid => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("Failed to remove PID file {}: {}", self.path.display(), e);
                }
            }
            _ => debug!("PID file {} no longer ours, leaving it", self.path.display()),
        }
    }
}

/// Read the PID stored at `path`.
///
/// Missing files and unparsable contents yield `Ok(None)`.
///
/// # Errors
///
/// Returns `PidFileError::Io` for read failures other than not-found.
pub fn read_pid(path: &Path) -> Result<Option<u32>, PidFileError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let pid = contents.trim().parse().ok();
            if pid.is_none() {
                warn!("Ignoring unparsable PID file {}", path.display());
            }
            Ok(pid)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PidFileError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Whether `pid` is alive and its command line mentions `program`
#[must_use]
pub fn is_instance_alive(pid: u32, program: &str) -> bool {
    fs::read(format!("/proc/{pid}/cmdline"))
        .map(|cmdline| String::from_utf8_lossy(&cmdline).contains(program))
        .unwrap_or(false)
}
