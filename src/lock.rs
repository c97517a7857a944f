//! Cross-process lock around the shared source clone.
//!
//! The lock is an OS advisory lock on a sibling file of the clone directory
//! (`<clone>.lock`). It is cooperative: processes that do not take it are not
//! excluded, and a holder that hangs keeps every other invocation waiting.
//! There is no staleness detection. A crashed holder releases the lock when
//! the OS closes its file.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// A lock file guarding one directory.
#[derive(Debug, Clone)]
pub struct CloneLock {
    path: PathBuf,
}

impl CloneLock {
    /// Lock for `dir`, stored at `dir` with a `.lock` extension appended.
    pub fn for_dir(dir: &Path) -> Self {
        let mut name = dir.as_os_str().to_os_string();
        name.push(".lock");
        Self {
            path: PathBuf::from(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the lock is held. Released when the guard drops.
    pub fn acquire(&self) -> Result<CloneLockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        debug!("waiting for {}", self.path.display());
        file.lock().map_err(|e| self.error(e))?;
        debug!("acquired {}", self.path.display());
        Ok(CloneLockGuard {
            file,
            path: self.path.clone(),
        })
    }

    fn error(&self, e: std::io::Error) -> Error {
        Error::Lock {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}

/// Held lock; unlocks on drop.
#[derive(Debug)]
pub struct CloneLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for CloneLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("unlocking {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lock_path_is_sibling() {
        let lock = CloneLock::for_dir(Path::new("/cache/clones/cue"));
        assert_eq!(lock.path(), Path::new("/cache/clones/cue.lock"));
    }

    #[test]
    fn test_acquire_release_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let lock = CloneLock::for_dir(&dir.path().join("clones").join("cue"));
        drop(lock.acquire().unwrap());
        drop(lock.acquire().unwrap());
        assert!(lock.path().exists());
    }

    #[test]
    fn test_holders_are_mutually_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let lock = CloneLock::for_dir(&dir.path().join("cue"));
        let inside = AtomicBool::new(false);
        let overlaps = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _guard = lock.acquire().unwrap();
                    if inside.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(20));
                    inside.store(false, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
