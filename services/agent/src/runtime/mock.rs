//! In-memory container runtime for tests and development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

/// A call observed by the mock runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create(ContainerSpec),
    Start(String),
    Stop { id: String, grace: Duration },
    Remove { id: String, remove_volumes: bool },
    Inspect(String),
}

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    address: String,
    running: bool,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    address: String,
    fail_starts: bool,
    fail_inspects: bool,
}

/// Mock runtime. Every container it starts reports the configured address.
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create a new mock runtime.
    pub fn new() -> Self {
        Self::with_address("172.17.0.2")
    }

    /// Create a mock runtime whose containers report `address`.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MockState {
                address: address.into(),
                ..Default::default()
            }),
        }
    }

    /// Create a mock runtime that fails all starts.
    pub fn failing() -> Self {
        let mut runtime = Self::new();
        runtime.state.get_mut().fail_starts = true;
        runtime
    }

    /// Change the address reported by containers started from now on.
    pub async fn set_address(&self, address: impl Into<String>) {
        self.state.lock().await.address = address.into();
    }

    /// Make subsequent starts fail (or succeed again).
    pub async fn set_fail_starts(&self, fail: bool) {
        self.state.lock().await.fail_starts = fail;
    }

    /// Make subsequent inspections fail (or succeed again).
    pub async fn set_fail_inspects(&self, fail: bool) {
        self.state.lock().await.fail_inspects = fail;
    }

    /// All calls observed so far, in order.
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().await.calls.clone()
    }

    /// Specs passed to `create`, in order.
    pub async fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Create(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of containers that currently exist.
    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Create(spec.clone()));
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!("container name {} is already in use", spec.name),
            });
        }

        state.next_id += 1;
        let id = format!("mock{:060x}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                address: String::new(),
                running: false,
            },
        );
        info!(name = %spec.name, id = %id, "[MOCK] Container created");
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Start(id.to_string()));
        if state.fail_starts {
            return Err(RuntimeError::Failed(
                "mock runtime configured to fail".to_string(),
            ));
        }
        let address = state.address.clone();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = true;
        container.address = address;
        debug!(id = %id, "[MOCK] Container started");
        Ok(())
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Stop {
            id: id.to_string(),
            grace,
        });
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.running = false;
        container.address.clear();
        debug!(id = %id, "[MOCK] Container stopped");
        Ok(())
    }

    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Remove {
            id: id.to_string(),
            remove_volumes,
        });
        state
            .containers
            .remove(id)
            .map(|_| debug!(id = %id, "[MOCK] Container removed"))
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(RuntimeCall::Inspect(id.to_string()));
        if state.fail_inspects {
            return Err(RuntimeError::Failed(
                "mock runtime configured to fail inspections".to_string(),
            ));
        }
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        Ok(ContainerState {
            id: id.to_string(),
            name: format!("/{}", container.name),
            ip_address: container.address.clone(),
            running: container.running,
        })
    }
}
