//! Node teardown.
//!
//! Runs the decommission phases in order:
//! 1. Start the node's own containerd (self-managed runtime only)
//! 2. Stop every pod
//! 3. Remove every pod
//! 4. Stop containerd (self-managed runtime only)
//! 5. Revert kubelet volume and network namespace mounts
//! 6. Erase the data and run directories
//!
//! Every phase runs regardless of how earlier phases went. Failures are
//! collected and reported together at the end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dirs::DirectoryEraser;
use crate::error::{Failures, TeardownError};
use crate::fs::{FsRemover, HostFs};
use crate::mounts::{
    path_contains, revert_mounts, Mounter, ProcMounter, KUBELET_PODS_SEGMENT, NETNS_SEGMENT,
};
use crate::runtime::{new_container_runtime, ContainerRuntime, RuntimeEndpoint, RuntimeError};
use crate::supervisor::{ContainerdConfig, DaemonState, DaemonSupervisor};

/// Run directory of the node installation.
pub const DEFAULT_RUN_DIR: &str = "/run/k0s";

/// Pods that still try to reach the API server fail to stop with this once
/// the node has stopped serving it. Expected on single node clusters.
pub const API_CONNECTION_REFUSED: &str = "443: connect: connection refused";

/// How long to wait for a freshly started containerd to create its socket.
const SOCKET_WAIT: Duration = Duration::from_secs(10);

fn is_expected_api_refusal(err: &RuntimeError) -> bool {
    err.to_string().contains(API_CONNECTION_REFUSED)
}

/// State for a single node teardown.
pub struct TeardownConfig {
    data_dir: PathBuf,
    run_dir: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    containerd: Option<DaemonSupervisor>,
    mounter: Arc<dyn Mounter>,
    fs: Arc<dyn FsRemover>,
}

impl TeardownConfig {
    /// Prepare a teardown of the node installed in `data_dir`.
    ///
    /// An empty `cri_socket` means the node runs its own containerd, which
    /// teardown will start and stop itself. Otherwise `cri_socket` is a
    /// `<kind>:<address>` specification of an externally managed runtime.
    pub fn new(data_dir: impl Into<PathBuf>, cri_socket: &str) -> Result<Self, TeardownError> {
        Self::with_dirs(data_dir, DEFAULT_RUN_DIR, cri_socket)
    }

    /// Like [`TeardownConfig::new`] with an explicit run directory.
    pub fn with_dirs(
        data_dir: impl Into<PathBuf>,
        run_dir: impl Into<PathBuf>,
        cri_socket: &str,
    ) -> Result<Self, TeardownError> {
        let data_dir = data_dir.into();
        let run_dir = run_dir.into();

        for dir in [&data_dir, &run_dir] {
            if !dir.is_absolute() {
                return Err(TeardownError::Configuration(format!(
                    "node directory {} must be an absolute path",
                    dir.display()
                )));
            }
        }

        let (endpoint, containerd) = if cri_socket.is_empty() {
            let config = ContainerdConfig::bundled(&data_dir, &run_dir);
            (
                RuntimeEndpoint::local(&run_dir),
                Some(DaemonSupervisor::new(config)),
            )
        } else {
            (RuntimeEndpoint::parse(cri_socket)?, None)
        };

        let runtime = new_container_runtime(&endpoint)?;

        debug!(
            data_dir = %data_dir.display(),
            run_dir = %run_dir.display(),
            runtime = %endpoint.kind,
            address = %endpoint.address,
            self_managed = containerd.is_some(),
            "Teardown configured"
        );

        Ok(Self {
            data_dir,
            run_dir,
            runtime,
            containerd,
            mounter: Arc::new(ProcMounter::new()),
            fs: Arc::new(HostFs),
        })
    }

    /// Replace the container runtime client.
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Replace the mount table access.
    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = mounter;
        self
    }

    /// Replace the file system access.
    pub fn with_fs(mut self, fs: Arc<dyn FsRemover>) -> Self {
        self.fs = fs;
        self
    }

    /// Set the containerd grace period before SIGKILL.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.containerd = self
            .containerd
            .map(|containerd| containerd.with_grace_period(grace_period));
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Whether teardown owns the containerd lifecycle.
    pub fn is_self_managed(&self) -> bool {
        self.containerd.is_some()
    }

    /// State of the self-managed containerd, if any.
    pub fn daemon_state(&self) -> Option<DaemonState> {
        self.containerd.as_ref().map(DaemonSupervisor::state)
    }

    /// Decommission the node.
    pub async fn teardown(mut self) -> Result<(), TeardownError> {
        info!(data_dir = %self.data_dir.display(), "Starting node teardown");
        let mut failures = Failures::new();

        if let Some(containerd) = self.containerd.as_mut() {
            match containerd.start() {
                Ok(()) => {
                    if !containerd.wait_for_socket(SOCKET_WAIT).await {
                        warn!(
                            socket = %containerd.config().socket_path.display(),
                            "containerd is not accepting connections, continuing anyway"
                        );
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to start containerd");
                    failures.push(e);
                }
            }
        }

        info!("Stopping all pods");
        failures.absorb(self.stop_all_containers().await);

        info!("Removing all pods");
        failures.absorb(self.remove_all_containers().await);

        if let Some(containerd) = self.containerd.as_mut() {
            containerd.stop().await;
        }

        info!("Reverting kubelet and network namespace mounts");
        failures.absorb(self.revert_workload_mounts());
        failures.absorb(self.revert_namespace_mounts());

        failures.absorb(self.erase_directories());

        match failures.into_result() {
            Ok(()) => {
                info!("Node teardown complete");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Node teardown finished with errors");
                Err(e)
            }
        }
    }

    /// Stop every pod the runtime knows about.
    pub async fn stop_all_containers(&self) -> Result<(), TeardownError> {
        let pods = self
            .runtime
            .list_containers()
            .await
            .map_err(TeardownError::Listing)?;

        let mut failures = Failures::new();
        for pod in &pods {
            debug!(pod_id = %pod, "Stopping pod");
            if let Err(e) = self.runtime.stop_container(pod).await {
                if is_expected_api_refusal(&e) {
                    debug!(pod_id = %pod, error = %e, "Ignoring pod stop error");
                } else {
                    failures.push(format!("failed to stop running pod {pod}: {e}"));
                }
            }
        }
        failures.into_result()
    }

    /// Remove every pod the runtime knows about.
    pub async fn remove_all_containers(&self) -> Result<(), TeardownError> {
        let pods = self
            .runtime
            .list_containers()
            .await
            .map_err(TeardownError::Listing)?;

        let mut failures = Failures::new();
        for pod in &pods {
            debug!(pod_id = %pod, "Removing pod");
            if let Err(e) = self.runtime.remove_container(pod).await {
                failures.push(format!("failed to remove pod {pod}: {e}"));
            }
        }
        failures.into_result()
    }

    /// Unmount and remove kubelet volume mounts.
    pub fn revert_workload_mounts(&self) -> Result<(), TeardownError> {
        revert_mounts(
            self.mounter.as_ref(),
            self.fs.as_ref(),
            path_contains(KUBELET_PODS_SEGMENT),
        )
    }

    /// Unmount and remove network namespace mounts.
    pub fn revert_namespace_mounts(&self) -> Result<(), TeardownError> {
        revert_mounts(
            self.mounter.as_ref(),
            self.fs.as_ref(),
            path_contains(NETNS_SEGMENT),
        )
    }

    /// Erase the data and run directories.
    pub fn erase_directories(&self) -> Result<(), TeardownError> {
        DirectoryEraser::new(
            &self.data_dir,
            &self.run_dir,
            self.mounter.as_ref(),
            self.fs.as_ref(),
        )
        .erase_all()
    }
}
