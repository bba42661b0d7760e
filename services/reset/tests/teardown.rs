//! Integration tests for the full teardown flow.
//!
//! These tests drive `TeardownConfig::teardown` end to end:
//! 1. Pods are stopped and removed through the runtime
//! 2. Kubelet and network namespace mounts are reverted
//! 3. CNI leftovers and the node directories are deleted
//!
//! Uses MockRuntime for the container runtime and a scratch directory as the
//! host root.

use std::path::PathBuf;
use std::sync::Arc;

use k0s_reset::cni::CNI_LEFTOVERS;
use k0s_reset::mounts::MountEntry;
use k0s_reset::testing::{RecordingMounter, RootedFs};
use k0s_reset::{MockRuntime, TeardownConfig, TeardownError};
use tempfile::TempDir;

const DATA_DIR: &str = "/var/lib/k0s";
const RUN_DIR: &str = "/run/k0s";
const EXTERNAL_SOCKET: &str = "remote:unix:///run/containerd/containerd.sock";

struct Host {
    _root: TempDir,
    fs: Arc<RootedFs>,
}

fn test_host(fs: impl FnOnce(RootedFs) -> RootedFs) -> Host {
    let root = tempfile::tempdir().unwrap();
    let fs = fs(RootedFs::new(root.path()));

    fs.create_dir("/var/lib/k0s/kubelet/pods").unwrap();
    fs.create_dir("/var/lib/k0s/containerd").unwrap();
    fs.create_file("/var/lib/k0s/bin/containerd").unwrap();
    fs.create_dir("/run/k0s/containerd").unwrap();
    fs.create_file("/run/k0s/containerd.sock").unwrap();

    Host {
        _root: root,
        fs: Arc::new(fs),
    }
}

fn test_teardown(
    host: &Host,
    runtime: &Arc<MockRuntime>,
    mounter: &Arc<RecordingMounter>,
) -> TeardownConfig {
    TeardownConfig::new(DATA_DIR, EXTERNAL_SOCKET)
        .unwrap()
        .with_runtime(runtime.clone())
        .with_mounter(mounter.clone())
        .with_fs(host.fs.clone())
}

#[tokio::test]
async fn test_clean_node_teardown_succeeds() {
    let host = test_host(|fs| fs);
    for path in CNI_LEFTOVERS {
        host.fs.create_file(path).unwrap();
    }

    let runtime = Arc::new(MockRuntime::new(Vec::<String>::new()));
    let mounter = Arc::new(RecordingMounter::new(vec![
        MountEntry::new("/", "overlay", "overlay"),
        MountEntry::new("/proc", "proc", "proc"),
    ]));

    test_teardown(&host, &runtime, &mounter)
        .teardown()
        .await
        .unwrap();

    assert!(mounter.unmounted().is_empty());
    for path in CNI_LEFTOVERS {
        assert!(!host.fs.exists(path), "{path} still present");
    }
    assert!(!host.fs.exists(DATA_DIR));
    assert!(!host.fs.exists(RUN_DIR));
}

#[tokio::test]
async fn test_pods_are_stopped_and_removed() {
    let host = test_host(|fs| fs);
    let runtime = Arc::new(MockRuntime::new(["pod-a", "pod-b"]));
    let mounter = Arc::new(RecordingMounter::new(vec![]));

    test_teardown(&host, &runtime, &mounter)
        .teardown()
        .await
        .unwrap();

    assert_eq!(runtime.stopped(), vec!["pod-a", "pod-b"]);
    assert_eq!(runtime.removed(), vec!["pod-a", "pod-b"]);
    assert_eq!(runtime.list_calls(), 2);
}

#[tokio::test]
async fn test_workload_and_namespace_mounts_are_reverted() {
    let host = test_host(|fs| fs);
    host.fs.create_dir("/var/lib/kubelet/pods/x").unwrap();
    host.fs.create_file("/run/netns/cni-1").unwrap();
    host.fs.create_dir("/var/lib/other").unwrap();

    let runtime = Arc::new(MockRuntime::new(Vec::<String>::new()));
    let mounter = Arc::new(RecordingMounter::new(vec![
        MountEntry::new("/var/lib/kubelet/pods/x", "tmpfs", "tmpfs"),
        MountEntry::new("/var/lib/other", "/dev/sdb", "ext4"),
        MountEntry::new("/run/netns/cni-1", "nsfs", "nsfs"),
    ]));

    test_teardown(&host, &runtime, &mounter)
        .teardown()
        .await
        .unwrap();

    assert_eq!(
        mounter.unmounted(),
        vec![
            PathBuf::from("/var/lib/kubelet/pods/x"),
            PathBuf::from("/run/netns/cni-1"),
        ]
    );
    assert!(!host.fs.exists("/var/lib/kubelet/pods/x"));
    assert!(!host.fs.exists("/run/netns/cni-1"));
    assert!(host.fs.exists("/var/lib/other"));
}

#[tokio::test]
async fn test_kubelet_predicate_reverts_exactly_the_pod_mount() {
    let host = test_host(|fs| fs);
    let runtime = Arc::new(MockRuntime::new(Vec::<String>::new()));
    let mounter = Arc::new(RecordingMounter::new(vec![
        MountEntry::new("/var/lib/kubelet/pods/x", "tmpfs", "tmpfs"),
        MountEntry::new("/var/lib/other", "/dev/sdb", "ext4"),
        MountEntry::new("/run/netns/y", "nsfs", "nsfs"),
    ]));

    test_teardown(&host, &runtime, &mounter)
        .revert_workload_mounts()
        .unwrap();

    assert_eq!(
        mounter.unmounted(),
        vec![PathBuf::from("/var/lib/kubelet/pods/x")]
    );
    assert_eq!(host.fs.removed_all(), vec!["/var/lib/kubelet/pods/x"]);
}

#[tokio::test]
async fn test_missing_cni_leftovers_never_fail_teardown() {
    let host = test_host(|fs| fs.with_failure("/etc/cni/net.d/calico-kubeconfig"));
    let runtime = Arc::new(MockRuntime::new(Vec::<String>::new()));
    let mounter = Arc::new(RecordingMounter::new(vec![]));

    let result = test_teardown(&host, &runtime, &mounter).teardown().await;

    assert!(result.is_ok(), "unexpected failure: {:?}", result.err());
    assert_eq!(host.fs.removed_files().len(), CNI_LEFTOVERS.len());
}

#[tokio::test]
async fn test_failures_from_all_phases_are_combined() {
    let host = test_host(|fs| fs.with_failure(DATA_DIR));
    let runtime = Arc::new(
        MockRuntime::new(["api-proxy", "web"])
            .with_stop_error(
                "api-proxy",
                "failed to destroy network: dial tcp 10.96.0.1:443: connect: connection refused",
            )
            .with_stop_error("web", "context deadline exceeded")
            .with_remove_error("web", "sandbox is in use"),
    );
    let mounter = Arc::new(
        RecordingMounter::new(vec![MountEntry::new("/run/netns/cni-1", "nsfs", "nsfs")])
            .with_unmount_failure("/run/netns/cni-1"),
    );

    let err = test_teardown(&host, &runtime, &mounter)
        .teardown()
        .await
        .unwrap_err();

    let TeardownError::Aggregate(failures) = &err else {
        panic!("expected aggregate error, got {err}");
    };
    assert_eq!(failures.len(), 4, "{failures:?}");
    assert_eq!(failures[0], "failed to stop running pod web: context deadline exceeded");
    assert_eq!(failures[1], "failed to remove pod web: sandbox is in use");
    assert!(failures[2].starts_with("failed to unmount /run/netns/cni-1"));
    assert!(failures[3].starts_with("failed to delete /var/lib/k0s"));

    let message = err.to_string();
    assert!(!message.contains("connection refused"));
    assert!(!message.contains("/run/k0s"));
    assert!(!host.fs.exists(RUN_DIR));
}

#[tokio::test]
async fn test_unreadable_mount_table_is_reported_per_phase() {
    let host = test_host(|fs| fs);
    let runtime = Arc::new(MockRuntime::new(Vec::<String>::new()));
    let mounter = Arc::new(RecordingMounter::unreadable());

    let err = test_teardown(&host, &runtime, &mounter)
        .teardown()
        .await
        .unwrap_err();

    let TeardownError::Aggregate(failures) = &err else {
        panic!("expected aggregate error, got {err}");
    };
    // Workload and namespace phases report it; directory erasure only logs.
    assert_eq!(failures.len(), 2);
    assert!(failures
        .iter()
        .all(|f| f.starts_with("failed to read mount table")));
    assert_eq!(mounter.list_calls(), 3);
    assert!(!host.fs.exists(DATA_DIR));
}
