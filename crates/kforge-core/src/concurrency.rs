use crate::job::CancelToken;
use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{debug, warn};

/// Exclusive claim on the build workspace. Only one job may use it at a time.
pub struct WorkspaceLock {
    lock_file: File,
}

impl WorkspaceLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Block until the lock is free.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = Self::open(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        Ok(Self { lock_file: file })
    }

    /// `Ok(None)` when another process holds the lock.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(e) => {
                debug!("workspace lock {} is held: {e}", lock_path.display());
                Ok(None)
            }
        }
    }

    /// Like [`try_acquire`](Self::try_acquire) but a held lock is an error.
    pub fn claim(lock_path: &Path) -> Result<Self, CoreError> {
        Self::try_acquire(lock_path)?
            .ok_or_else(|| CoreError::WorkspaceBusy(lock_path.display().to_string()))
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// First Ctrl-C cancels `token` cooperatively; a second one exits at once.
pub fn install_signal_handler(token: CancelToken) {
    let result = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(130);
        }
        token.cancel();
        eprintln!("\ncancellation requested, stopping after the current step (Ctrl-C again to abort)...");
    });
    if let Err(e) = result {
        warn!("cannot install Ctrl-C handler: {e}");
    }
}
