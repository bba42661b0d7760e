//! k0s node reset library.
//!
//! Decommissions a node: stops and removes every pod through the container
//! runtime, shuts down the node's own containerd if it runs one, reverts the
//! mounts the node created and finally erases the node's data and run
//! directories.
//!
//! ## Modules
//!
//! - `teardown`: Phase ordering and failure aggregation
//! - `runtime`: Container runtime interface, CRI client and runtime selection
//! - `supervisor`: Lifecycle of a node-local containerd
//! - `mounts`: Mount table access and mount reversal
//! - `dirs`: Data and run directory removal
//! - `cni`: Network plugin leftovers
//!
//! Every teardown step is best effort: failures are collected and reported
//! together instead of aborting the remaining steps.

pub mod cni;
pub mod config;
pub mod dirs;
pub mod error;
pub mod fs;
pub mod mounts;
pub mod runtime;
pub mod supervisor;
pub mod teardown;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use error::{Failures, TeardownError};
pub use runtime::{ContainerRuntime, MockRuntime};
pub use teardown::TeardownConfig;
