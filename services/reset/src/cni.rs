//! Network plugin leftovers.

use std::path::Path;

use tracing::debug;

use crate::fs::FsRemover;

/// Configuration files that calico and kube-router drop into the host CNI
/// directory and never clean up themselves.
pub const CNI_LEFTOVERS: [&str; 3] = [
    "/etc/cni/net.d/10-calico.conflist",
    "/etc/cni/net.d/calico-kubeconfig",
    "/etc/cni/net.d/10-kuberouter.conflist",
];

/// Delete the known CNI leftovers.
///
/// Which files exist depends on the network plugin the node ran, so every
/// failure is only reported at debug level.
pub fn remove_cni_leftovers(fs: &dyn FsRemover) {
    let mut failures = Vec::new();

    for path in CNI_LEFTOVERS {
        match fs.remove_file(Path::new(path)) {
            Ok(()) => debug!(path = %path, "Removed CNI leftover"),
            Err(e) => failures.push(format!("failed to delete {path}: {e}")),
        }
    }

    if !failures.is_empty() {
        debug!(failures = %failures.join(", "), "Some CNI leftovers were not removed");
    }
}
