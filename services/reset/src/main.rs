//! k0s node reset
//!
//! Removes every trace of a k0s node from the host: pods, the node's own
//! containerd, kubelet and network namespace mounts, CNI leftovers and the
//! node's data and run directories.

use std::process::ExitCode;

use anyhow::{Context, Result};
use k0s_reset::config::Config;
use k0s_reset::TeardownConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::from(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        data_dir = %config.data_dir.display(),
        cri_socket = %config.cri_socket,
        "Starting k0s node reset"
    );

    match run(&config).await {
        Ok(()) => {
            info!("Node reset complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Node reset failed");
            // Log the error chain
            for cause in e.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            ExitCode::from(1)
        }
    }
}

async fn run(config: &Config) -> Result<()> {
    let teardown = TeardownConfig::new(&config.data_dir, &config.cri_socket)
        .context("failed to configure node teardown")?;

    info!(
        data_dir = %teardown.data_dir().display(),
        run_dir = %teardown.run_dir().display(),
        self_managed = teardown.is_self_managed(),
        "Configured node teardown"
    );

    teardown
        .teardown()
        .await
        .context("node teardown finished with errors")?;

    Ok(())
}
