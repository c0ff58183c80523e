//! Process-wide run lock
//!
//! udev may start one instance per device at boot, so whole runs are
//! serialized through an advisory `flock` on a lock file. The kernel drops
//! the lock when its owner exits, so a crashed run never wedges later boots.
//! The file itself is left in place; it records the last owner's pid and
//! acquisition time for diagnostics only.

use crate::NetconfError;
use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;

/// Delay between acquisition attempts
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Advisory lock on a file
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl ProcessLock {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the lock, for at most the configured timeout
    pub async fn acquire(&self) -> Result<LockGuard, NetconfError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let file = self.open().await?;
            match flock(&file, FlockOperation::NonBlockingLockExclusive) {
                Ok(()) => {
                    record_owner(&file);
                    debug!("Acquired lock {}", self.path.display());
                    return Ok(LockGuard { _file: file });
                }
                Err(Errno::WOULDBLOCK) | Err(Errno::INTR) => {}
                Err(e) => {
                    return Err(NetconfError::Lock(format!(
                        "cannot lock {}: {}",
                        self.path.display(),
                        e
                    )));
                }
            }

            if Instant::now() >= deadline {
                return Err(NetconfError::Timeout(format!(
                    "lock {}",
                    self.path.display()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn open(&self) -> Result<File, NetconfError> {
        let lock_error = |e: std::io::Error| {
            NetconfError::Lock(format!("cannot open {}: {}", self.path.display(), e))
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(lock_error)?;
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await
            .map_err(lock_error)?;
        Ok(file.into_std().await)
    }
}

/// Best-effort `<pid> <unix-seconds>` note in the held file
fn record_owner(mut file: &File) {
    let note = format!("{} {}\n", std::process::id(), unix_now());
    if let Err(e) = file.set_len(0).and_then(|()| file.write_all(note.as_bytes())) {
        debug!("Could not record lock owner: {}", e);
    }
}

/// Held lock; released when dropped (or when the process exits)
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn lock_in(temp: &TempDir, timeout: Duration) -> ProcessLock {
        ProcessLock::new(temp.path().join("run/lock/test.lock"), timeout)
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let lock = lock_in(&temp, Duration::from_secs(5));

        let guard = lock.acquire().await.unwrap();
        let content = fs::read_to_string(lock.path()).await.unwrap();
        assert!(content.starts_with(&format!("{} ", std::process::id())));

        drop(guard);
        drop(lock.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let temp = TempDir::new().unwrap();
        let lock = lock_in(&temp, Duration::from_millis(50));

        let _guard = lock.acquire().await.unwrap();
        let err = lock.acquire().await.unwrap_err();
        assert!(matches!(err, NetconfError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_leftover_file_does_not_block() {
        let temp = TempDir::new().unwrap();
        let lock = lock_in(&temp, Duration::from_millis(50));
        fs::create_dir_all(lock.path().parent().unwrap()).await.unwrap();
        fs::write(lock.path(), "999999 0\n").await.unwrap();

        let _guard = lock.acquire().await.unwrap();
        let content = fs::read_to_string(lock.path()).await.unwrap();
        assert!(content.starts_with(&format!("{} ", std::process::id())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_are_serialized() {
        let temp = TempDir::new().unwrap();
        let lock = lock_in(&temp, Duration::from_secs(30));
        fs::create_dir_all(lock.path().parent().unwrap()).await.unwrap();
        fs::write(lock.path(), "999999 0\n").await.unwrap();

        let holders = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let holders = Arc::clone(&holders);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let guard = lock.acquire().await.unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
