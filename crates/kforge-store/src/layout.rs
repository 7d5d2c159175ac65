use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

pub const BUILD_LOG_NAME: &str = "build.log";

/// Paths inside the single build workspace (default `~/kernel_build`).
///
/// The workspace is owned by the active build job. The lock file lives next
/// to the workspace rather than inside it so that cleanup never deletes a
/// held lock.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append-only log of every streamed command.
    #[inline]
    pub fn log_file(&self) -> PathBuf {
        self.root.join(BUILD_LOG_NAME)
    }

    #[inline]
    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    #[inline]
    pub fn source_dir(&self, unpacked_dir: &str) -> PathBuf {
        self.root.join(unpacked_dir)
    }

    pub fn lock_file(&self) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map_or_else(|| "kforge".into(), |n| n.to_string_lossy().into_owned());
        let parent = self.root.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!(".{name}.lock"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    /// Remove everything in the workspace except the build log.
    pub fn clear_except_log(&self) -> Result<(), StoreError> {
        if !self.root.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name() == BUILD_LOG_NAME {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Remove the whole workspace, log included.
    pub fn remove_all(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
