//! CRI-backed runtime.
//!
//! Kubernetes workloads are reached via their pod sandboxes: stopping a
//! sandbox stops every container in it, and removing the sandbox removes
//! them as well.

use async_trait::async_trait;
use k0s_cri::RuntimeServiceClient;
use tracing::debug;

use super::{ContainerRuntime, RuntimeError};

/// Runtime that talks CRI over a unix socket.
#[derive(Debug, Clone)]
pub struct CriRuntime {
    address: String,
}

impl CriRuntime {
    /// Create a runtime for the given `unix://` address.
    ///
    /// No connection is made until the first call; the runtime may still be
    /// starting up.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }

    async fn client(&self) -> Result<RuntimeServiceClient, RuntimeError> {
        Ok(RuntimeServiceClient::connect(&self.address).await?)
    }
}

#[async_trait]
impl ContainerRuntime for CriRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, RuntimeError> {
        let mut client = self.client().await?;
        let pods = client.list_pod_sandbox().await?;

        debug!(address = %self.address, count = pods.len(), "Listed pod sandboxes");

        Ok(pods
            .into_iter()
            .map(|pod| {
                if let Some(meta) = &pod.metadata {
                    debug!(
                        pod_id = %pod.id,
                        namespace = %meta.namespace,
                        name = %meta.name,
                        state = pod.state().as_str_name(),
                        "Found pod sandbox"
                    );
                }
                pod.id
            })
            .collect())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut client = self.client().await?;
        client.stop_pod_sandbox(id).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut client = self.client().await?;
        client.remove_pod_sandbox(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_runtime_fails_listing() {
        let dir = tempfile::tempdir().unwrap();
        let address = format!("unix://{}/containerd.sock", dir.path().display());
        let runtime = CriRuntime::new(&address);

        let err = runtime.list_containers().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Cri(k0s_cri::CriError::Connect { .. })
        ));
        assert!(err.to_string().contains(&address));
    }
}
