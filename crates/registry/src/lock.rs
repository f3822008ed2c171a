//! Per-container advisory locks.
//!
//! A lock is a directory under `.ploinky/locks/`; `mkdir` is atomic on every
//! filesystem we care about, so whoever creates it owns the container until
//! the guard drops. Acquisition is a bounded spin, not a queue: two ensures
//! racing the same container is an operator mistake worth surfacing.

use std::path::{Path, PathBuf};

use {tokio::time::sleep, tracing::debug};

use crate::error::{Error, Result};

const SPIN_ATTEMPTS: u32 = 50;
const SPIN_DELAY_MS: u64 = 200;

/// RAII guard over a lock directory. Dropping releases the lock.
#[derive(Debug)]
pub struct LockDir {
    path: PathBuf,
}

impl LockDir {
    /// Acquire the lock for `container_name`, spinning up to
    /// `50 × 200 ms` before giving up with [`Error::LockBusy`].
    pub async fn acquire(locks_dir: &Path, container_name: &str) -> Result<Self> {
        std::fs::create_dir_all(locks_dir)?;
        let path = locks_dir.join(format!("container_{container_name}.lock"));

        for attempt in 0..SPIN_ATTEMPTS {
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    debug!(lock = %path.display(), attempt, "acquired container lock");
                    return Ok(Self { path });
                },
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    sleep(std::time::Duration::from_millis(SPIN_DELAY_MS)).await;
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::LockBusy {
            container: container_name.to_string(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            debug!(lock = %self.path.display(), error = %e, "failed to release container lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let locks = dir.path().join("locks");

        let guard = LockDir::acquire(&locks, "ploinky_test").await.unwrap();
        assert!(guard.path().is_dir());
        let path = guard.path().to_path_buf();
        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_reacquire_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let locks = dir.path().join("locks");

        let first = LockDir::acquire(&locks, "c").await.unwrap();
        drop(first);
        let second = LockDir::acquire(&locks, "c").await;
        assert!(second.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let locks = dir.path().join("locks");

        let _held = LockDir::acquire(&locks, "busy").await.unwrap();
        // Paused tokio time auto-advances through the spin sleeps.
        let result = LockDir::acquire(&locks, "busy").await;
        assert!(matches!(result, Err(Error::LockBusy { .. })));
    }
}
