//! File removal on the host.

use std::fs;
use std::io;
use std::path::Path;

/// File-system removal operations used during teardown.
pub trait FsRemover: Send + Sync {
    /// Remove `path` and everything below it. A missing path is not an error.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a single file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The real host file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl FsRemover for HostFs {
    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let result = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
