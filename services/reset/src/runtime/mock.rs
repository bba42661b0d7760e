//! In-memory runtime for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{ContainerRuntime, RuntimeError};

#[derive(Debug, Default)]
struct MockState {
    containers: Vec<String>,
    stopped: Vec<String>,
    removed: Vec<String>,
    list_calls: usize,
}

/// Mock runtime for testing.
///
/// Holds a fixed set of workload IDs. Stop and remove failures can be
/// scripted per ID; removed IDs disappear from later listings.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    list_error: Option<String>,
    stop_errors: HashMap<String, String>,
    remove_errors: HashMap<String, String>,
}

impl MockRuntime {
    /// Create a mock runtime holding the given workload IDs.
    pub fn new<I, S>(containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(MockState {
                containers: containers.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Create a mock runtime whose listing always fails.
    pub fn failing_list(message: &str) -> Self {
        Self {
            list_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Make stopping `id` fail with `message`.
    pub fn with_stop_error(mut self, id: &str, message: &str) -> Self {
        self.stop_errors.insert(id.to_string(), message.to_string());
        self
    }

    /// Make removing `id` fail with `message`.
    pub fn with_remove_error(mut self, id: &str, message: &str) -> Self {
        self.remove_errors.insert(id.to_string(), message.to_string());
        self
    }

    /// IDs for which a stop was attempted, in call order.
    pub fn stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    /// IDs for which a remove was attempted, in call order.
    pub fn removed(&self) -> Vec<String> {
        self.lock().removed.clone()
    }

    /// Number of list calls made.
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, RuntimeError> {
        let mut state = self.lock();
        state.list_calls += 1;

        if let Some(message) = &self.list_error {
            return Err(RuntimeError::Other(message.clone()));
        }

        debug!(count = state.containers.len(), "[MOCK] Listing containers");
        Ok(state.containers.clone())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.lock().stopped.push(id.to_string());
        debug!(id = %id, "[MOCK] Stopping container");

        match self.stop_errors.get(id) {
            Some(message) => Err(RuntimeError::Other(message.clone())),
            None => Ok(()),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.removed.push(id.to_string());
        debug!(id = %id, "[MOCK] Removing container");

        if let Some(message) = self.remove_errors.get(id) {
            return Err(RuntimeError::Other(message.clone()));
        }

        state.containers.retain(|c| c != id);
        Ok(())
    }
}
