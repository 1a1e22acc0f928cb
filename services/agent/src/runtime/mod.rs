//! Container runtime interface.
//!
//! The runtime interface abstracts container lifecycle operations:
//! - Creating, starting, stopping and removing containers
//! - Inspecting a container's identity, address and running state
//!
//! `DockerRuntime` talks to the Docker Engine API over its Unix socket.
//! `MockRuntime` is provided for testing and development.

mod docker;
mod mock;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use docker::DockerRuntime;
pub use mock::{MockRuntime, RuntimeCall};

/// Errors from container runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl From<hyper::http::Error> for RuntimeError {
    fn from(err: hyper::http::Error) -> Self {
        RuntimeError::Api {
            status: 0,
            message: err.to_string(),
        }
    }
}

/// What to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, also the instance name.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Host bind mounts, `host:container`.
    pub binds: Vec<String>,
    /// Anonymous volumes, by container path.
    pub volumes: Vec<String>,
    pub privileged: bool,
    /// TCP ports exposed by the container.
    pub exposed_ports: Vec<u16>,
}

/// Inspection result for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    /// Name as reported by the runtime, possibly with a leading `/`.
    pub name: String,
    pub ip_address: String,
    pub running: bool,
}

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime answers.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Create a container and return its ID.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start a created or stopped container.
    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop a container, killing it after `grace`.
    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Remove a container, optionally with its anonymous volumes.
    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError>;

    /// Inspect a container.
    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError>;
}
