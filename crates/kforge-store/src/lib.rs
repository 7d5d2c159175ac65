//! On-disk state for kforge.
//!
//! `WorkspaceLayout` names every path inside the build workspace (source
//! trees, archives, the persistent build log, the lock file) and implements
//! the cleanup rules. `InstallHistoryStore` keeps the per-user JSON history of
//! installed kernels and reconciles it against the boot directory.

pub mod history;
pub mod layout;

pub use history::{InstallHistoryStore, InstalledKernelRecord, MAX_HISTORY_ENTRIES};
pub use layout::{WorkspaceLayout, BUILD_LOG_NAME};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_wraps_io() {
        let e: StoreError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(e.to_string().starts_with("store I/O error"));
    }
}
