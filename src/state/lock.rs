//! Advisory file locking for shared JSON state.
//!
//! A sidecar `<file>.lock` containing the holder's PID is created with
//! `create_new`; contenders spin-wait in 100 ms steps. Once the timeout
//! elapses the lock is presumed to belong to a dead process and is
//! force-removed. The guard releases on drop, covering every exit path.

use anyhow::{Context as _, Result};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Spin interval between acquisition attempts.
const SPIN_INTERVAL: Duration = Duration::from_millis(100);

/// Scoped advisory lock on a state file.
pub struct FileLock {
    lock_path: PathBuf,
}

impl FileLock {
    /// Acquire the lock for `target`, waiting up to `timeout` before
    /// treating an existing lock file as stale and taking it over.
    pub fn acquire(target: &Path, timeout: Duration) -> Result<Self> {
        let lock_path = sidecar_path(target);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state dir {}", parent.display()))?;
        }

        let start = Instant::now();
        let mut evicted_stale = false;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    debug!("Acquired lock {}", lock_path.display());
                    return Ok(Self { lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if start.elapsed() >= timeout {
                        if evicted_stale {
                            anyhow::bail!(
                                "Could not acquire lock {} even after evicting a stale holder",
                                lock_path.display()
                            );
                        }
                        let holder = std::fs::read_to_string(&lock_path).unwrap_or_default();
                        warn!(
                            "Lock {} held past timeout by pid {}, presuming stale and removing",
                            lock_path.display(),
                            holder.trim()
                        );
                        let _ = std::fs::remove_file(&lock_path);
                        evicted_stale = true;
                        continue;
                    }
                    std::thread::sleep(SPIN_INTERVAL);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create lock file {}", lock_path.display())
                    });
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn sidecar_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    name.push_str(".lock");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("patterns.json");

        {
            let _guard = FileLock::acquire(&target, Duration::from_secs(1)).unwrap();
            assert!(dir.path().join("patterns.json.lock").exists());
        }
        assert!(!dir.path().join("patterns.json.lock").exists());
    }

    #[test]
    fn test_lock_contains_pid() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("patterns.json");
        let _guard = FileLock::acquire(&target, Duration::from_secs(1)).unwrap();

        let content = std::fs::read_to_string(dir.path().join("patterns.json.lock")).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[test]
    fn test_stale_lock_taken_over_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("patterns.json");
        let lock_path = dir.path().join("patterns.json.lock");

        // Simulate a crashed holder
        std::fs::write(&lock_path, "99999999").unwrap();

        let start = Instant::now();
        let guard = FileLock::acquire(&target, Duration::from_millis(300)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
        drop(guard);
        assert!(!lock_path.exists());
    }
}
