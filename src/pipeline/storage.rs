//! Scoped ownership of the transient buffer directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Owns the root buffer directory for the lifetime of the process.
///
/// Claiming purges whatever a previous run left behind; dropping the guard
/// removes the directory and everything in it.
#[derive(Debug)]
pub struct StorageRoot {
    path: PathBuf,
}

impl StorageRoot {
    pub fn claim(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if path.exists() {
            info!("Purging stale buffer directory {:?}", path);
            if let Err(e) = fs::remove_dir_all(&path) {
                warn!("Could not purge {:?}: {}", path, e);
            }
        }
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding one camera's frames.
    pub fn camera_dir(&self, label: &str) -> PathBuf {
        self.path.join(format!("cam_{}", label))
    }
}

impl Drop for StorageRoot {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => info!("Removed buffer directory {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {:?}: {}", self.path, e),
        }
    }
}
