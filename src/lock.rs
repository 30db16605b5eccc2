//! Inter-process lock serializing port claims.
//!
//! The kernel's parport claim/release has a race that can leave the port
//! wedged ("parport0: don't know how to wake ppdev0") when several processes
//! claim it at once. Every process that touches the port takes an exclusive
//! `flock(2)` on a shared lock file before claiming, so at most one claim is
//! ever in progress.
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use log::trace;

use crate::{Error, Result};

/// Exclusive advisory lock.
pub trait Lock: Send {
    /// Block until the lock is held.
    fn lock(&mut self) -> Result<()>;

    /// Release the lock.
    fn unlock(&mut self) -> Result<()>;
}

/// `flock(2)` on a lock file.
///
/// The file is created on first use, and then kept open for the life of the
/// lock.
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

impl LockFile {
    /// Create lock on the given path. Nothing is opened until first lock.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    fn err(&self, source: std::io::Error) -> Error {
        Error::Lock {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn flock(&mut self, op: libc::c_int) -> Result<()> {
        if self.file.is_none() {
            let f = File::options()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|e| self.err(e))?;
            self.file = Some(f);
        }
        let fd = match &self.file {
            Some(f) => f.as_raw_fd(),
            None => return Err(Error::msg("lock file not open")),
        };
        loop {
            // SAFETY: fd belongs to a File we own, and stays open for the
            // duration of the call.
            let rc = unsafe { libc::flock(fd, op) };
            if rc == 0 {
                return Ok(());
            }
            let e = std::io::Error::last_os_error();
            if e.kind() != std::io::ErrorKind::Interrupted {
                return Err(self.err(e));
            }
        }
    }
}

impl Lock for LockFile {
    fn lock(&mut self) -> Result<()> {
        trace!("Locking {}", self.path.display());
        self.flock(libc::LOCK_EX)
    }

    fn unlock(&mut self) -> Result<()> {
        trace!("Unlocking {}", self.path.display());
        self.flock(libc::LOCK_UN)
    }
}
