//! Removal of the node's data and run directories.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cni::remove_cni_leftovers;
use crate::error::{Failures, TeardownError};
use crate::fs::FsRemover;
use crate::mounts::{path_is_one_of, revert_mounts, Mounter};

/// Erases everything the node installation owns on disk.
pub struct DirectoryEraser<'a> {
    data_dir: &'a Path,
    run_dir: &'a Path,
    mounter: &'a dyn Mounter,
    fs: &'a dyn FsRemover,
}

impl<'a> DirectoryEraser<'a> {
    pub fn new(
        data_dir: &'a Path,
        run_dir: &'a Path,
        mounter: &'a dyn Mounter,
        fs: &'a dyn FsRemover,
    ) -> Self {
        Self {
            data_dir,
            run_dir,
            mounter,
            fs,
        }
    }

    /// Mount points that must be released before the data dir can go.
    ///
    /// Some distributions (alpine) leave the data dir or its kubelet
    /// directory mounted onto itself.
    fn own_mounts(&self) -> Vec<PathBuf> {
        vec![self.data_dir.to_path_buf(), self.data_dir.join("kubelet")]
    }

    /// Unmount leftovers, drop CNI files, then delete the data and run dirs.
    ///
    /// Only the two deletions contribute to the returned error.
    pub fn erase_all(&self) -> Result<(), TeardownError> {
        let own_mounts = self.own_mounts();
        if let Err(e) = revert_mounts(self.mounter, self.fs, path_is_one_of(&own_mounts)) {
            warn!(error = %e, "Failed to release data dir mounts");
        }

        remove_cni_leftovers(self.fs);

        info!(
            data_dir = %self.data_dir.display(),
            run_dir = %self.run_dir.display(),
            "Deleting node data dir and run dir"
        );

        let mut failures = Failures::new();
        for dir in [self.data_dir, self.run_dir] {
            if let Err(e) = self.fs.remove_all(dir) {
                failures.push(format!("failed to delete {}: {}", dir.display(), e));
            }
        }
        failures.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounts::MountEntry;
    use crate::testing::{RecordingMounter, RootedFs};
    use tempfile::tempdir;

    const DATA_DIR: &str = "/var/lib/k0s";
    const RUN_DIR: &str = "/run/k0s";

    fn node_fs(root: &Path) -> RootedFs {
        let fs = RootedFs::new(root);
        fs.create_dir("/var/lib/k0s/kubelet/pods").unwrap();
        fs.create_file("/var/lib/k0s/bin/containerd").unwrap();
        fs.create_file("/run/k0s/containerd.sock").unwrap();
        fs
    }

    #[test]
    fn test_erases_both_directories() {
        let dir = tempdir().unwrap();
        let fs = node_fs(dir.path());
        let mounter = RecordingMounter::new(vec![]);

        DirectoryEraser::new(Path::new(DATA_DIR), Path::new(RUN_DIR), &mounter, &fs)
            .erase_all()
            .unwrap();

        assert!(!fs.exists(DATA_DIR));
        assert!(!fs.exists(RUN_DIR));
    }

    #[test]
    fn test_data_dir_failure_does_not_block_run_dir() {
        let dir = tempdir().unwrap();
        let fs = node_fs(dir.path()).with_failure(DATA_DIR);
        let mounter = RecordingMounter::new(vec![]);

        let err = DirectoryEraser::new(Path::new(DATA_DIR), Path::new(RUN_DIR), &mounter, &fs)
            .erase_all()
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("failed to delete /var/lib/k0s"));
        assert!(!message.contains("/run/k0s"));
        assert!(!fs.exists(RUN_DIR));
    }

    #[test]
    fn test_unmounts_data_dir_and_kubelet_only() {
        let dir = tempdir().unwrap();
        let fs = node_fs(dir.path());
        let mounter = RecordingMounter::new(vec![
            MountEntry::new("/var/lib/k0s", "/dev/sdb", "ext4"),
            MountEntry::new("/var/lib/k0s/kubelet", "/dev/sdb", "ext4"),
            MountEntry::new("/var/lib/k0s/kubelet/pods/x", "tmpfs", "tmpfs"),
        ]);

        DirectoryEraser::new(Path::new(DATA_DIR), Path::new(RUN_DIR), &mounter, &fs)
            .erase_all()
            .unwrap();

        assert_eq!(
            mounter.unmounted(),
            vec![
                PathBuf::from("/var/lib/k0s/kubelet"),
                PathBuf::from("/var/lib/k0s"),
            ]
        );
    }

    #[test]
    fn test_unmount_and_cni_failures_are_not_returned() {
        let dir = tempdir().unwrap();
        let fs = node_fs(dir.path());
        let mounter = RecordingMounter::new(vec![MountEntry::new(
            "/var/lib/k0s/kubelet",
            "/dev/sdb",
            "ext4",
        )])
        .with_unmount_failure("/var/lib/k0s/kubelet");

        let result =
            DirectoryEraser::new(Path::new(DATA_DIR), Path::new(RUN_DIR), &mounter, &fs).erase_all();

        assert!(result.is_ok());
        assert_eq!(fs.removed_files().len(), 3);
    }

    #[test]
    fn test_unreadable_mount_table_still_erases() {
        let dir = tempdir().unwrap();
        let fs = node_fs(dir.path());
        let mounter = RecordingMounter::unreadable();

        DirectoryEraser::new(Path::new(DATA_DIR), Path::new(RUN_DIR), &mounter, &fs)
            .erase_all()
            .unwrap();
        assert!(!fs.exists(DATA_DIR));
    }
}
