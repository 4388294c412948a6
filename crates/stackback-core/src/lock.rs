//! Advisory file locks for cross-process safety.
//!
//! Two locks exist:
//! - `RegistryLock`: held around Load→mutate→Save of the registry file,
//!   acquired by polling until a deadline.
//! - `InstanceLock`: held for the life of one backup run, acquired
//!   non-blocking; a second run fails fast with a lock error.
//!
//! Both are released on Drop.

use crate::error::{Result, StackbackError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    Ok(f)
}

// ---------------------------------------------------------------------------
// RegistryLock
// ---------------------------------------------------------------------------

pub struct RegistryLock {
    file: File,
    path: PathBuf,
}

impl RegistryLock {
    /// Acquire the lock, retrying until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(_) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                Err(_) => {
                    return Err(StackbackError::LockTimeout {
                        path: path.to_path_buf(),
                        timeout_secs: timeout.as_secs(),
                    })
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

// ---------------------------------------------------------------------------
// InstanceLock
// ---------------------------------------------------------------------------

pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Try once to become the single running instance. The holder's pid is
    /// written into the file for diagnosis.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        let mut file = open_lock_file(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StackbackError::InstanceLocked(path.to_path_buf()));
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = self.file.unlock();
    }
}
