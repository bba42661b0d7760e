//! Configuration for the reset binary.

use std::path::PathBuf;

use anyhow::{bail, Result};

/// Data directory of a default node installation.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/k0s";

/// Reset configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory of the node installation.
    pub data_dir: PathBuf,

    /// CRI socket specification (`<kind>:<address>`). Empty for the node's
    /// own containerd.
    pub cri_socket: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let data_dir = std::env::var("K0S_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        if !data_dir.is_absolute() {
            bail!(
                "K0S_DATA_DIR must be an absolute path, got {}",
                data_dir.display()
            );
        }

        let cri_socket = std::env::var("K0S_CRI_SOCKET").unwrap_or_default();

        let log_level =
            std::env::var("K0S_RESET_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            data_dir,
            cri_socket,
            log_level,
        })
    }
}
