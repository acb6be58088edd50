use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{DownloadError, Result};

/// Scratch directory owned by exactly one download.
///
/// Tracked files are removed before the directory itself. If [`TempDirectory::cleanup`]
/// is never reached (the owning future was dropped, or a panic unwound through it),
/// the same removal runs synchronously on drop.
#[derive(Debug)]
pub struct TempDirectory {
    path: PathBuf,
    files: Vec<PathBuf>,
    released: bool,
}

impl TempDirectory {
    /// Hidden scratch directory name for a destination file name.
    pub fn name_for(file_name: &str) -> String {
        format!(".{}", file_name)
    }

    pub async fn create(path: PathBuf) -> Result<Self> {
        debug!("Creating chunks temp dir {}", path.display());
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| DownloadError::DirectoryCreate { path: path.clone(), source })?;
        Ok(Self { path, files: Vec::new(), released: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a file that must be gone before the directory is removed.
    pub fn track(&mut self, file: PathBuf) {
        self.files.push(file);
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.files
    }

    /// Removes every tracked file, then the directory. Failures are logged, never returned.
    pub async fn cleanup(mut self) {
        debug!("Removing partial files in {}", self.path.display());
        for file in &self.files {
            if let Err(e) = tokio::fs::remove_file(file).await {
                log_remove_failure(file, &e);
            }
        }
        if let Err(e) = tokio::fs::remove_dir(&self.path).await {
            log_remove_failure(&self.path, &e);
        }
        self.released = true;
    }
}

impl Drop for TempDirectory {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for file in &self.files {
            if let Err(e) = std::fs::remove_file(file) {
                log_remove_failure(file, &e);
            }
        }
        if let Err(e) = std::fs::remove_dir(&self.path) {
            log_remove_failure(&self.path, &e);
        }
    }
}

fn log_remove_failure(path: &Path, e: &std::io::Error) {
    if e.kind() == ErrorKind::NotFound {
        debug!("Already gone: {}", path.display());
    } else {
        warn!("Could not remove {}: {}", path.display(), e);
    }
}
