//! Mount table inspection and mount reversal.
//!
//! The mount table is re-read on every reversal; pods, network namespaces
//! and overlays come and go while teardown runs.
//! Note: unmounting is Linux-only and uses umount2(2) via nix.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Failures, TeardownError};
use crate::fs::FsRemover;

/// Kubelet volume mounts live below this path segment.
pub const KUBELET_PODS_SEGMENT: &str = "kubelet/pods";

/// Network namespace bind mounts live below this path segment.
pub const NETNS_SEGMENT: &str = "run/netns";

/// Mount table of the current process.
const PROC_MOUNTS: &str = "/proc/self/mounts";

/// A single mount table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
}

impl MountEntry {
    pub fn new(path: impl Into<PathBuf>, device: &str, fs_type: &str) -> Self {
        Self {
            path: path.into(),
            device: device.to_string(),
            fs_type: fs_type.to_string(),
        }
    }
}

/// Access to the live mount table.
pub trait Mounter: Send + Sync {
    /// List current mounts in mount order.
    fn list(&self) -> io::Result<Vec<MountEntry>>;

    /// Unmount the file system mounted at `path`.
    fn unmount(&self, path: &Path) -> io::Result<()>;
}

/// Mounter backed by `/proc/self/mounts` and umount2(2).
#[derive(Debug, Clone)]
pub struct ProcMounter {
    table: PathBuf,
}

impl ProcMounter {
    pub fn new() -> Self {
        Self {
            table: PathBuf::from(PROC_MOUNTS),
        }
    }
}

impl Default for ProcMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Mounter for ProcMounter {
    fn list(&self) -> io::Result<Vec<MountEntry>> {
        let table = fs::read_to_string(&self.table)?;
        Ok(parse_mount_table(&table))
    }

    #[cfg(target_os = "linux")]
    fn unmount(&self, path: &Path) -> io::Result<()> {
        use nix::mount::{umount2, MntFlags};

        umount2(path, MntFlags::empty()).map_err(io::Error::from)
    }

    /// Stub for non-Linux platforms.
    #[cfg(not(target_os = "linux"))]
    fn unmount(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unmount only supported on Linux",
        ))
    }
}

/// Parse the contents of a `/proc/mounts`-style table.
///
/// Malformed lines are skipped.
pub fn parse_mount_table(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry {
                path: PathBuf::from(unescape(path)),
                device: unescape(device),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Decode the octal escapes (`\040` and friends) the kernel uses for
/// whitespace and backslashes in mount fields.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() && is_octal(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Matches mounts whose path contains `segment`.
pub fn path_contains(segment: &str) -> impl Fn(&MountEntry) -> bool + '_ {
    move |entry| entry.path.to_string_lossy().contains(segment)
}

/// Matches mounts whose path is exactly one of `paths`.
pub fn path_is_one_of(paths: &[PathBuf]) -> impl Fn(&MountEntry) -> bool + '_ {
    move |entry| paths.iter().any(|p| *p == entry.path)
}

/// Unmount and remove every mount point matching `predicate`.
///
/// The unmount and the removal are attempted independently for each match,
/// innermost mounts first, and every failure is collected.
pub fn revert_mounts<P>(
    mounter: &dyn Mounter,
    fs: &dyn FsRemover,
    predicate: P,
) -> Result<(), TeardownError>
where
    P: Fn(&MountEntry) -> bool,
{
    let entries = mounter.list().map_err(TeardownError::MountTable)?;
    let mut failures = Failures::new();
    let mut reverted = 0usize;

    for entry in entries.iter().rev().filter(|e| predicate(*e)) {
        debug!(
            path = %entry.path.display(),
            device = %entry.device,
            fs_type = %entry.fs_type,
            "Unmounting"
        );

        if let Err(e) = mounter.unmount(&entry.path) {
            failures.push(format!("failed to unmount {}: {}", entry.path.display(), e));
        }
        if let Err(e) = fs.remove_all(&entry.path) {
            failures.push(format!("failed to remove {}: {}", entry.path.display(), e));
        }
        reverted += 1;
    }

    if reverted > 0 {
        info!(
            mounts = reverted,
            failures = failures.len(),
            "Reverted mounts"
        );
    }

    failures.into_result()
}
