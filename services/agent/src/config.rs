//! Configuration for the agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

/// Default port of the agent API.
pub const DEFAULT_PORT: u16 = 9500;

/// Agent configuration, from flags or `LHORC_*` environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "lhorc-agent")]
#[command(author, version, about = "Host agent for lhorc block volumes", long_about = None)]
pub struct Config {
    /// etcd endpoints, comma separated.
    #[arg(long, env = "LHORC_ETCD_SERVERS", value_delimiter = ',')]
    pub etcd_servers: Vec<String>,

    /// Key prefix for all records in etcd.
    #[arg(long, env = "LHORC_ETCD_PREFIX", default_value = "/longhorn")]
    pub etcd_prefix: String,

    /// Engine image used when settings do not name one.
    #[arg(long, env = "LHORC_LONGHORN_IMAGE", default_value = "rancher/longhorn:latest")]
    pub longhorn_image: String,

    /// Port the agent API listens on.
    #[arg(long, env = "LHORC_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Docker Engine socket.
    #[arg(long, env = "LHORC_DOCKER_SOCKET", default_value = "/var/run/docker.sock")]
    pub docker_socket: PathBuf,

    /// Directory holding the host identity file.
    #[arg(long, env = "LHORC_CONFIG_DIR", default_value = "/var/lib/rancher/longhorn")]
    pub config_dir: PathBuf,

    /// Directory where controllers expose volume block devices.
    #[arg(long, env = "LHORC_DEVICE_ROOT", default_value = "/dev/longhorn")]
    pub device_root: PathBuf,

    /// Seconds to wait for a controller API to answer.
    #[arg(long, env = "LHORC_WAIT_API_TIMEOUT", default_value_t = 30)]
    pub wait_api_timeout_secs: u64,

    /// Seconds to wait for a volume device to appear.
    #[arg(long, env = "LHORC_WAIT_DEVICE_TIMEOUT", default_value_t = 30)]
    pub wait_device_timeout_secs: u64,

    /// Grace period in seconds before a stopping container is killed.
    #[arg(long, env = "LHORC_CONTAINER_STOP_TIMEOUT", default_value_t = 60)]
    pub container_stop_timeout_secs: u64,

    /// Milliseconds between readiness polls.
    #[arg(long, env = "LHORC_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Use the in-memory container runtime and metadata store (development only).
    #[arg(long, env = "LHORC_MOCK_RUNTIME")]
    pub mock_runtime: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LHORC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse the process arguments and validate them.
    pub fn load() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.etcd_servers.is_empty() && !self.mock_runtime {
            bail!("unspecified etcd servers");
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            wait_api_timeout: Duration::from_secs(self.wait_api_timeout_secs),
            wait_device_timeout: Duration::from_secs(self.wait_device_timeout_secs),
            container_stop_timeout: Duration::from_secs(self.container_stop_timeout_secs),
            device_root: self.device_root.clone(),
        }
    }
}

/// Timeouts and paths used by the local executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Budget for a new controller's API to become reachable.
    pub wait_api_timeout: Duration,

    /// Budget for a new controller's block device to appear.
    pub wait_device_timeout: Duration,

    /// Grace period passed to the runtime on stop.
    pub container_stop_timeout: Duration,

    /// `<device_root>/<volume>` is the device path of a volume.
    pub device_root: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            wait_api_timeout: Duration::from_secs(30),
            wait_device_timeout: Duration::from_secs(30),
            container_stop_timeout: Duration::from_secs(60),
            device_root: PathBuf::from("/dev/longhorn"),
        }
    }
}
