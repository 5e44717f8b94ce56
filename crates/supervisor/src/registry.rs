//! Watch lease management for per-directory exclusivity
//!
//! At most one watching session per working directory across invocations.
//! The lease is an exclusive `flock` on a file in the registry directory,
//! named by a BLAKE3 digest of the canonical working directory. The lock is
//! released by the kernel when the holder exits, so a crash never leaves a
//! live lease behind.

use lw_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts before giving up when the lease file keeps being replaced
const ACQUIRE_ATTEMPTS: usize = 3;

/// Pause before retrying a lock held by no live holder
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Where leases live
#[derive(Debug, Clone)]
pub struct Registry {
    dir: PathBuf,
}

/// Lease file content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHolder {
    pub pid: u32,
    /// Milliseconds since the Unix epoch
    pub started_at: u64,
    /// Working directory the lease covers
    #[serde(default)]
    pub workdir: PathBuf,
}

/// Result of a lease attempt
#[derive(Debug)]
pub enum Acquired {
    Lease(WatchLease),
    /// Another live session holds the lease
    HeldBy(Option<LeaseHolder>),
}

/// What `status` found for a working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    /// No lease file
    Free,
    /// A live session holds the lease
    Held(LeaseHolder),
    /// A lease file remains but nothing holds it
    Stale(Option<LeaseHolder>),
}

/// An exclusively held lease; released on drop
#[derive(Debug)]
pub struct WatchLease {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
    holder: LeaseHolder,
    released: bool,
}

impl Registry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Registry in the system temp directory
    pub fn default_location() -> Self {
        Self::new(std::env::temp_dir().join("lockwatch"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lease file for `workdir`
    pub fn lease_path(&self, workdir: &Path) -> PathBuf {
        use std::os::unix::ffi::OsStrExt;

        let canonical = workdir
            .canonicalize()
            .unwrap_or_else(|_| workdir.to_path_buf());
        let digest = blake3::hash(canonical.as_os_str().as_bytes());
        let key = &digest.to_hex()[..16];
        self.dir.join(format!("{}.lease", key))
    }

    /// Try to take the lease for `workdir` without waiting on its holder
    ///
    /// Blocking file I/O; a lock held by no live process is retried with a
    /// short sleep, at most `ACQUIRE_ATTEMPTS - 1` times.
    pub fn try_acquire(&self, workdir: &Path) -> Result<Acquired> {
        std::fs::create_dir_all(&self.dir)?;
        let lease_path = self.lease_path(workdir);

        for attempt in 1..=ACQUIRE_ATTEMPTS {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&lease_path)?;

            if !try_flock_exclusive(&file)? {
                let holder = read_holder(&mut file).ok();
                let live = holder.as_ref().map_or(false, |h| is_process_alive(h.pid));
                // A `status` probe or a holder still writing its record
                if !live && attempt < ACQUIRE_ATTEMPTS {
                    std::thread::sleep(RETRY_BACKOFF);
                    continue;
                }
                return Ok(Acquired::HeldBy(holder));
            }

            // A releasing holder may have unlinked the file we opened
            if !same_file(&file, &lease_path) {
                debug!("Lease file replaced while locking, retrying");
                continue;
            }

            if let Ok(previous) = read_holder(&mut file) {
                if !is_process_alive(previous.pid) {
                    warn!("Reclaiming stale watch lease left by pid {}", previous.pid);
                }
            }

            let holder = LeaseHolder {
                pid: std::process::id(),
                started_at: current_timestamp_ms(),
                workdir: workdir.to_path_buf(),
            };
            write_holder(&mut file, &holder)?;
            debug!("Acquired watch lease {}", lease_path.display());

            return Ok(Acquired::Lease(WatchLease {
                path: lease_path,
                file,
                holder,
                released: false,
            }));
        }

        Err(Error::Lease(format!(
            "{} kept changing while locking",
            lease_path.display()
        )))
    }

    /// Report who, if anyone, holds the lease for `workdir`
    pub fn status(&self, workdir: &Path) -> Result<LeaseStatus> {
        let lease_path = self.lease_path(workdir);
        let mut file = match OpenOptions::new().read(true).open(&lease_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LeaseStatus::Free),
            Err(e) => return Err(e.into()),
        };

        let holder = read_holder(&mut file).ok();
        if try_flock_exclusive(&file)? {
            // Dropping `file` releases the probe lock
            return Ok(LeaseStatus::Stale(holder));
        }
        match holder {
            Some(holder) => Ok(LeaseStatus::Held(holder)),
            None => Ok(LeaseStatus::Stale(None)),
        }
    }
}

impl WatchLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn holder(&self) -> &LeaseHolder {
        &self.holder
    }

    /// Release the lease, removing its file
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        std::fs::remove_file(&self.path)?;
        debug!("Released watch lease {}", self.path.display());
        Ok(())
    }
}

impl Drop for WatchLease {
    fn drop(&mut self) {
        // Once released the path may already belong to a new holder
        if self.released {
            return;
        }
        // Unlink before the descriptor closes so no waiter locks a dead inode
        let _ = std::fs::remove_file(&self.path);
    }
}

fn write_holder(file: &mut File, holder: &LeaseHolder) -> Result<()> {
    let serialized = serde_json::to_string(holder)
        .map_err(|e| Error::Lease(format!("cannot serialize holder: {}", e)))?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_holder(file: &mut File) -> Result<LeaseHolder> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(|e| Error::Lease(format!("unreadable holder: {}", e)))
}

/// Try to acquire an exclusive file lock (non-blocking)
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

/// Check if process is alive
#[cfg(target_os = "linux")]
pub fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(not(target_os = "linux"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Null signal: existence check only
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
