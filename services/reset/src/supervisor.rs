//! Supervision of a node-local containerd.
//!
//! When no external CRI socket is configured the node's own containerd has to
//! be brought up so its pods can be stopped and removed, and brought down again
//! before its directories are deleted.
//!
//! State machine: `NotStarted -> Running -> Stopping -> Stopped`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::error::TeardownError;

/// Grace period between SIGINT and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Static containerd configuration written by the node installation.
pub const CONTAINERD_CONFIG_PATH: &str = "/etc/k0s/containerd.toml";

/// How often to re-check the process or socket while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of the supervised daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

/// Paths for a node-local containerd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerdConfig {
    /// Path to the containerd binary.
    pub bin_path: PathBuf,
    /// Path of the socket containerd listens on.
    pub socket_path: PathBuf,
    /// Persistent state (`--root`).
    pub root_dir: PathBuf,
    /// Runtime state (`--state`).
    pub state_dir: PathBuf,
    /// Configuration file (`--config`).
    pub config_path: PathBuf,
}

impl ContainerdConfig {
    /// Layout of the containerd bundled with the node installation.
    pub fn bundled(data_dir: &Path, run_dir: &Path) -> Self {
        Self {
            bin_path: data_dir.join("bin").join("containerd"),
            socket_path: run_dir.join("containerd.sock"),
            root_dir: data_dir.join("containerd"),
            state_dir: run_dir.join("containerd"),
            config_path: PathBuf::from(CONTAINERD_CONFIG_PATH),
        }
    }

    /// Command line arguments for the daemon.
    pub fn args(&self) -> Vec<String> {
        vec![
            format!("--root={}", self.root_dir.display()),
            format!("--state={}", self.state_dir.display()),
            format!("--address={}", self.socket_path.display()),
            format!("--config={}", self.config_path.display()),
        ]
    }
}

/// Owns a spawned containerd process.
#[derive(Debug)]
pub struct DaemonSupervisor {
    config: ContainerdConfig,
    grace_period: Duration,
    state: DaemonState,
    child: Option<Child>,
}

impl DaemonSupervisor {
    pub fn new(config: ContainerdConfig) -> Self {
        Self {
            config,
            grace_period: DEFAULT_GRACE_PERIOD,
            state: DaemonState::NotStarted,
            child: None,
        }
    }

    /// Set the grace period before SIGKILL.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn config(&self) -> &ContainerdConfig {
        &self.config
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Process ID of the running daemon.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawn the daemon detached from our process group.
    ///
    /// Returns as soon as the process exists; containerd may not be accepting
    /// connections yet.
    pub fn start(&mut self) -> Result<(), TeardownError> {
        if self.state != DaemonState::NotStarted {
            warn!(state = ?self.state, "containerd already started, not starting again");
            return Ok(());
        }

        let child = Command::new(&self.config.bin_path)
            .args(self.config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|source| TeardownError::Spawn {
                binary: self.config.bin_path.clone(),
                source,
            })?;

        info!(
            pid = child.id(),
            socket = %self.config.socket_path.display(),
            "Started containerd"
        );

        self.child = Some(child);
        self.state = DaemonState::Running;
        Ok(())
    }

    /// Wait up to `timeout` for the daemon to accept connections.
    ///
    /// A socket file left behind by a previous instance does not count as
    /// ready; only a successful connect does.
    pub async fn wait_for_socket(&self, timeout: Duration) -> bool {
        let socket_path = &self.config.socket_path;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match UnixStream::connect(socket_path).await {
                Ok(_) => {
                    debug!(
                        socket = %socket_path.display(),
                        "containerd is accepting connections"
                    );
                    return true;
                }
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        debug!(
                            socket = %socket_path.display(),
                            error = %e,
                            "containerd socket not ready"
                        );
                        return false;
                    }
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Interrupt the daemon, then kill it if it has not exited within the
    /// grace period.
    ///
    /// Signal failures are logged and never returned. Ends in `Stopped`.
    pub async fn stop(&mut self) {
        if self.state != DaemonState::Running {
            debug!(state = ?self.state, "containerd not running, nothing to stop");
            return;
        }

        let Some(mut child) = self.child.take() else {
            self.state = DaemonState::Stopped;
            return;
        };

        self.state = DaemonState::Stopping;
        debug!("Attempting to stop containerd");

        match child.id() {
            Some(pid) => {
                debug!(pid, "Found containerd pid");
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                    error!(pid, error = %e, "Failed to interrupt containerd");
                }
            }
            None => debug!("containerd already reaped"),
        }

        // Anything short of a confirmed exit is escalated.
        if !wait_for_exit(&mut child, self.grace_period).await {
            warn!(
                grace_secs = self.grace_period.as_secs_f64(),
                "containerd did not exit in time, sending SIGKILL"
            );
            if let Err(e) = child.kill().await {
                error!(error = %e, "Failed to send SIGKILL to containerd");
            }
        }

        self.state = DaemonState::Stopped;
        info!("Stopped containerd");
    }
}

/// Poll the child until it exits or `grace_period` elapses.
///
/// Returns true only when the exit was observed.
async fn wait_for_exit(child: &mut Child, grace_period: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace_period;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "containerd exited");
                return true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to check containerd exit status");
                return false;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
