use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// File name of the advisory lock kept next to the manifest.
pub const PROJECT_LOCK_FILE: &str = ".lockstep.lock";

/// Exclusive advisory lock serialising lock operations on one project.
///
/// Released when dropped.
pub struct ProjectLock {
    lock_file: File,
    path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl ProjectLock {
    /// Block until the lock for the project rooted at `project_dir` is held.
    pub fn acquire(project_dir: &Path) -> Result<Self, CoreError> {
        let path = project_dir.join(PROJECT_LOCK_FILE);
        let file = open_lock_file(&path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        debug!("acquired project lock {}", path.display());
        Ok(Self {
            lock_file: file,
            path,
        })
    }

    pub fn try_acquire(project_dir: &Path) -> Result<Option<Self>, CoreError> {
        let path = project_dir.join(PROJECT_LOCK_FILE);
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path,
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C cancels running solves; a second one exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ncancellation requested, stopping solver processes...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lock = ProjectLock::acquire(dir.path()).unwrap();
            assert!(lock.path().exists());
            assert!(lock.path().ends_with(PROJECT_LOCK_FILE));
        }
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = ProjectLock::acquire(dir.path()).unwrap();
        let result = ProjectLock::try_acquire(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = ProjectLock::acquire(dir.path()).unwrap();
        }
        let lock2 = ProjectLock::try_acquire(dir.path()).unwrap();
        assert!(lock2.is_some());
    }
}
