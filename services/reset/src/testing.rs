//! Host doubles for exercising teardown without touching the real host.
//!
//! `RootedFs` maps absolute host paths below a scratch directory and
//! `RecordingMounter` serves a fixed mount table. Both record what they were
//! asked to do.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::fs::{FsRemover, HostFs};
use crate::mounts::{MountEntry, Mounter};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// File system rooted at a scratch directory.
#[derive(Debug)]
pub struct RootedFs {
    root: PathBuf,
    failing: HashSet<PathBuf>,
    removed_all: Mutex<Vec<String>>,
    removed_files: Mutex<Vec<String>>,
}

impl RootedFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            failing: HashSet::new(),
            removed_all: Mutex::new(Vec::new()),
            removed_files: Mutex::new(Vec::new()),
        }
    }

    /// Make every removal of `path` fail with permission denied.
    pub fn with_failure(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    /// Translate a host path into the scratch directory.
    pub fn host_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    pub fn create_dir(&self, path: impl AsRef<Path>) -> io::Result<()> {
        fs::create_dir_all(self.host_path(path))
    }

    pub fn create_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let target = self.host_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, b"")
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.host_path(path).exists()
    }

    /// Paths passed to `remove_all`, in call order.
    pub fn removed_all(&self) -> Vec<String> {
        lock(&self.removed_all).clone()
    }

    /// Paths passed to `remove_file`, in call order.
    pub fn removed_files(&self) -> Vec<String> {
        lock(&self.removed_files).clone()
    }

    fn check(&self, path: &Path) -> io::Result<()> {
        if self.failing.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied",
            ));
        }
        Ok(())
    }
}

impl FsRemover for RootedFs {
    fn remove_all(&self, path: &Path) -> io::Result<()> {
        lock(&self.removed_all).push(path.display().to_string());
        self.check(path)?;
        HostFs.remove_all(&self.host_path(path))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        lock(&self.removed_files).push(path.display().to_string());
        self.check(path)?;
        HostFs.remove_file(&self.host_path(path))
    }
}

/// Mounter serving a fixed mount table.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    entries: Mutex<Vec<MountEntry>>,
    failing: HashSet<PathBuf>,
    list_error: bool,
    list_calls: Mutex<usize>,
    unmounted: Mutex<Vec<PathBuf>>,
}

impl RecordingMounter {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            ..Default::default()
        }
    }

    /// A mounter whose mount table cannot be read.
    pub fn unreadable() -> Self {
        Self {
            list_error: true,
            ..Default::default()
        }
    }

    /// Make unmounting `path` fail with EBUSY.
    pub fn with_unmount_failure(mut self, path: impl Into<PathBuf>) -> Self {
        self.failing.insert(path.into());
        self
    }

    /// Paths that were unmounted, in call order.
    pub fn unmounted(&self) -> Vec<PathBuf> {
        lock(&self.unmounted).clone()
    }

    /// Number of times the mount table was read.
    pub fn list_calls(&self) -> usize {
        *lock(&self.list_calls)
    }
}

impl Mounter for RecordingMounter {
    fn list(&self) -> io::Result<Vec<MountEntry>> {
        *lock(&self.list_calls) += 1;
        if self.list_error {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "cannot read mount table",
            ));
        }
        Ok(lock(&self.entries).clone())
    }

    fn unmount(&self, path: &Path) -> io::Result<()> {
        lock(&self.unmounted).push(path.to_path_buf());
        if self.failing.contains(path) {
            return Err(io::Error::from(nix::errno::Errno::EBUSY));
        }
        lock(&self.entries).retain(|e| e.path != path);
        Ok(())
    }
}
