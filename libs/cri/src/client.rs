//! Unary gRPC client for the CRI runtime service.
//!
//! The client dials the runtime over a unix socket. Addresses use the
//! `unix:///path/to/socket` form kubelet and crictl accept.

use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::UnixStream;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::debug;

use crate::v1::{
    methods, ListPodSandboxRequest, ListPodSandboxResponse, PodSandbox, RemovePodSandboxRequest,
    RemovePodSandboxResponse, StopPodSandboxRequest, StopPodSandboxResponse,
};

/// Timeout for establishing the socket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single RPC.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Placeholder authority; the connector ignores it and dials the socket.
const UNIX_ENDPOINT_URI: &str = "http://[::]:50051";

/// Errors from the CRI client.
#[derive(Debug, Error)]
pub enum CriError {
    #[error("invalid CRI address {0:?}: expected unix:///path/to/socket")]
    InvalidAddress(String),

    #[error("failed to connect to {address}: {detail}")]
    Connect { address: String, detail: String },

    #[error("{method} failed: {}", .status.message())]
    Rpc {
        method: &'static str,
        status: tonic::Status,
    },
}

/// Extract the socket path from a `unix://` address.
pub fn socket_path(address: &str) -> Result<PathBuf, CriError> {
    let path = address
        .strip_prefix("unix://")
        .ok_or_else(|| CriError::InvalidAddress(address.to_string()))?;

    if !path.starts_with('/') {
        return Err(CriError::InvalidAddress(address.to_string()));
    }

    Ok(PathBuf::from(path))
}

/// Render an error together with its source chain.
fn error_chain(err: &dyn StdError) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

/// Client for `runtime.v1.RuntimeService`.
pub struct RuntimeServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl RuntimeServiceClient {
    /// Dial the runtime at `address`.
    pub async fn connect(address: &str) -> Result<Self, CriError> {
        let path = socket_path(address)?;
        debug!(address = %address, "Connecting to CRI runtime");

        let channel = Endpoint::from_static(UNIX_ENDPOINT_URI)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = path.clone();
                async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
            }))
            .await
            .map_err(|e| CriError::Connect {
                address: address.to_string(),
                detail: error_chain(&e),
            })?;

        Ok(Self {
            inner: tonic::client::Grpc::new(channel),
        })
    }

    /// List every pod sandbox known to the runtime.
    pub async fn list_pod_sandbox(&mut self) -> Result<Vec<PodSandbox>, CriError> {
        let response: ListPodSandboxResponse = self
            .unary(
                methods::LIST_POD_SANDBOX,
                ListPodSandboxRequest { filter: None },
            )
            .await?;
        Ok(response.items)
    }

    /// Stop a pod sandbox and all of its containers.
    pub async fn stop_pod_sandbox(&mut self, pod_sandbox_id: &str) -> Result<(), CriError> {
        let _: StopPodSandboxResponse = self
            .unary(
                methods::STOP_POD_SANDBOX,
                StopPodSandboxRequest {
                    pod_sandbox_id: pod_sandbox_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Remove a pod sandbox. Running containers are force-removed by the runtime.
    pub async fn remove_pod_sandbox(&mut self, pod_sandbox_id: &str) -> Result<(), CriError> {
        let _: RemovePodSandboxResponse = self
            .unary(
                methods::REMOVE_POD_SANDBOX,
                RemovePodSandboxRequest {
                    pod_sandbox_id: pod_sandbox_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    async fn unary<Req, Resp>(&mut self, method: &'static str, request: Req) -> Result<Resp, CriError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        self.inner.ready().await.map_err(|e| CriError::Rpc {
            method,
            status: tonic::Status::unknown(format!("service was not ready: {}", error_chain(&e))),
        })?;

        let codec = ProstCodec::<Req, Resp>::default();
        let path = PathAndQuery::from_static(method);
        let response = self
            .inner
            .unary(tonic::Request::new(request), path, codec)
            .await
            .map_err(|status| CriError::Rpc { method, status })?;

        Ok(response.into_inner())
    }
}
