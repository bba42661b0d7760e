//! CRI runtime service client.
//!
//! Node reset only needs to enumerate, stop and remove pod sandboxes, so this
//! crate carries the handful of `runtime.v1.RuntimeService` messages involved
//! instead of the full CRI API, together with a unary client that dials the
//! runtime over its unix socket.

pub mod client;
pub mod v1;

pub use client::{socket_path, CriError, RuntimeServiceClient};
pub use v1::{PodSandbox, PodSandboxMetadata, PodSandboxState};
