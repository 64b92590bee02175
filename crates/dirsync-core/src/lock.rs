//! Advisory single-instance lock for a sync job.
//!
//! Only one process may run a sync against a given job file at a time. The
//! lock is a sibling file holding the owner's PID; acquisition probes the
//! recorded process for liveness and reclaims the lock when it is gone. PID
//! reuse after a crash can defeat the probe; that is an accepted limitation
//! of advisory locking.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another sync is already running for this job (pid {pid})")]
    Held { pid: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Holds `<job>.lock` for the lifetime of a run. Dropping releases it.
#[derive(Debug)]
pub struct JobLock {
    path: PathBuf,
}

impl JobLock {
    /// Take the lock next to `job_path`.
    pub fn acquire(job_path: &Path) -> Result<Self, LockError> {
        let path = lock_path(job_path);

        match try_create(&path) {
            Ok(()) => Ok(Self { path }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if let Some(pid) = read_pid(&path) {
                    if process_alive(pid) {
                        return Err(LockError::Held { pid });
                    }
                }
                warn!("reclaiming stale lock {}", path.display());
                fs::remove_file(&path)?;
                try_create(&path)?;
                Ok(Self { path })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// `job.json` -> `job.json.lock`, next to the job file.
pub fn lock_path(job_path: &Path) -> PathBuf {
    let mut name = job_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "job".into());
    name.push(".lock");
    job_path.with_file_name(name)
}

fn try_create(path: &Path) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    write!(file, "{}", std::process::id())
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Signal 0 probes for existence without delivering anything; EPERM still
    // means the process is there.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No portable liveness probe; treat an existing lock as stale.
    false
}
