//! Error types for node teardown.

use std::fmt::Display;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Teardown errors.
#[derive(Debug, Error)]
pub enum TeardownError {
    /// Malformed CRI socket specification.
    #[error("invalid runtime configuration: {0}")]
    Configuration(String),

    /// The runtime kind is recognised but has no client.
    #[error("container runtime {0:?} is not supported yet")]
    UnsupportedRuntime(String),

    /// Could not enumerate pods, so there is nothing to iterate over.
    #[error("failed to list pods: {0}")]
    Listing(#[source] RuntimeError),

    /// Could not launch the runtime daemon.
    #[error("failed to start containerd ({binary}): {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Could not read the mount table.
    #[error("failed to read mount table: {0}")]
    MountTable(#[source] io::Error),

    /// One or more independent operations failed.
    #[error("{}", .0.join(", "))]
    Aggregate(Vec<String>),
}

/// Ordered collection of failure descriptions.
///
/// Operations that must attempt every item push their failures here instead
/// of returning early, then convert the collector into a single result.
#[derive(Debug, Default)]
pub struct Failures(Vec<String>);

impl Failures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single failure.
    pub fn push(&mut self, failure: impl Display) {
        self.0.push(failure.to_string());
    }

    /// Record the error of a finished step, flattening nested aggregates.
    pub fn absorb(&mut self, result: Result<(), TeardownError>) {
        match result {
            Ok(()) => {}
            Err(TeardownError::Aggregate(failures)) => self.0.extend(failures),
            Err(e) => self.push(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_result(self) -> Result<(), TeardownError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TeardownError::Aggregate(self.0))
        }
    }
}
