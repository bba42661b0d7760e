//! Container runtime interface and runtime selection.
//!
//! The runtime interface abstracts the three operations teardown needs:
//! - Listing workload IDs
//! - Stopping a workload
//! - Removing a workload
//!
//! A CRI implementation and a mock implementation are provided. The runtime
//! is picked once, from the CRI socket specification, when the teardown is
//! configured.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::TeardownError;

mod cri;
mod mock;

pub use cri::CriRuntime;
pub use mock::MockRuntime;

/// Errors from a container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Cri(#[from] k0s_cri::CriError),

    #[error("{0}")]
    Other(String),
}

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List the IDs of all workloads known to the runtime.
    async fn list_containers(&self) -> Result<Vec<String>, RuntimeError>;

    /// Stop a workload.
    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a workload.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Runtime flavours that can appear in a socket specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Any CRI-compatible runtime (`remote` or `cri`).
    Cri,
    /// Docker through dockershim.
    Docker,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Cri => "cri",
            RuntimeKind::Docker => "docker",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = TeardownError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" | "cri" => Ok(RuntimeKind::Cri),
            "docker" => Ok(RuntimeKind::Docker),
            other => Err(TeardownError::Configuration(format!(
                "unknown runtime type {other:?}, must be either of remote or docker"
            ))),
        }
    }
}

/// A runtime kind paired with its normalised `unix://` socket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEndpoint {
    pub kind: RuntimeKind,
    pub address: String,
}

impl RuntimeEndpoint {
    /// The node's own containerd socket under `run_dir`.
    pub fn local(run_dir: &Path) -> Self {
        Self {
            kind: RuntimeKind::Cri,
            address: format!("unix://{}", run_dir.join("containerd.sock").display()),
        }
    }

    /// Parse a `<kind>:<address>` specification.
    ///
    /// The address may be given as `unix:///path`, `///path` or `/path`.
    pub fn parse(spec: &str) -> Result<Self, TeardownError> {
        let (kind, address) = spec.split_once(':').ok_or_else(|| {
            TeardownError::Configuration(format!("cannot parse CRI socket path {spec:?}"))
        })?;

        let kind = kind.parse()?;
        let address = normalize_address(address).ok_or_else(|| {
            TeardownError::Configuration(format!("invalid CRI socket address in {spec:?}"))
        })?;

        Ok(Self { kind, address })
    }
}

fn normalize_address(raw: &str) -> Option<String> {
    let path = if let Some(path) = raw.strip_prefix("unix://") {
        path
    } else if let Some(path) = raw.strip_prefix("//") {
        path
    } else {
        raw
    };

    if path.len() > 1 && path.starts_with('/') {
        Some(format!("unix://{path}"))
    } else {
        None
    }
}

/// Build the runtime client for an endpoint.
pub fn new_container_runtime(
    endpoint: &RuntimeEndpoint,
) -> Result<Arc<dyn ContainerRuntime>, TeardownError> {
    match endpoint.kind {
        RuntimeKind::Cri => Ok(Arc::new(CriRuntime::new(&endpoint.address))),
        RuntimeKind::Docker => Err(TeardownError::UnsupportedRuntime(
            endpoint.kind.to_string(),
        )),
    }
}
