//! lhorc Host Agent Library
//!
//! One agent runs on every storage host. It keeps volume records in etcd and
//! turns controller and replica operations into Docker container lifecycle
//! actions, on this host or, through the scheduler, on a peer.
//!
//! ## Modules
//!
//! - `orchestrator`: public lifecycle operations (volumes, instances, settings)
//! - `scheduler`: routing of schedule requests to the owning host
//! - `executor`: local execution of schedule requests against the runtime
//! - `runtime`: container runtime interface (Docker, mock)
//! - `store`: metadata store (etcd, in-memory)
//! - `probe`: readiness barriers for new controllers
//! - `identity`: persistent host identity
//! - `api`: HTTP endpoint for requests forwarded by peers

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod orchestrator;
pub mod probe;
pub mod runtime;
pub mod scheduler;
pub mod store;

pub use error::{ErrorKind, OrcError, Result};
pub use orchestrator::Orchestrator;
