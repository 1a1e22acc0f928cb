//! Local execution of schedule requests.
//!
//! Turns a routed request into container runtime calls on this host. Every
//! returned instance is derived from a fresh inspection of its container.

use std::sync::Arc;

use async_trait::async_trait;
use lhorc_types::{
    ActionPayload, CreateControllerPayload, CreateReplicaPayload, HostInfo, InstanceInfo,
    InstanceType, ScheduleRequest,
};
use tracing::{error, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::error::{OrcError, Result};
use crate::probe::ReadinessProbe;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::scheduler::ScheduleHandler;

/// Orchestrator kind this executor accepts.
pub const ORCHESTRATOR_KIND: &str = "docker";

/// Controller management API and frontend listener port.
pub const CONTROLLER_PORT: u16 = 9501;

/// First port of the replica data range.
pub const REPLICA_PORT: u16 = 9502;

const REPLICA_PORTS: [u16; 3] = [REPLICA_PORT, REPLICA_PORT + 1, REPLICA_PORT + 2];

const REPLICA_DATA_PATH: &str = "/volume";

/// Executes schedule requests against the local container runtime.
pub struct LocalExecutor {
    host: Arc<HostInfo>,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn ReadinessProbe>,
    config: ExecutorConfig,
}

impl LocalExecutor {
    pub fn new(
        host: Arc<HostInfo>,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn ReadinessProbe>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            host,
            runtime,
            probe,
            config,
        }
    }

    #[instrument(skip(self, payload), fields(instance = %payload.instance_name, volume = %payload.volume_name))]
    async fn create_controller(&self, payload: &CreateControllerPayload) -> Result<InstanceInfo> {
        let mut command = vec![
            "launch".to_string(),
            "controller".to_string(),
            "--listen".to_string(),
            format!("0.0.0.0:{CONTROLLER_PORT}"),
            "--frontend".to_string(),
            "tgt".to_string(),
        ];
        for address in &payload.replica_addresses {
            command.push("--replica".to_string());
            command.push(address.clone());
        }
        command.push(payload.volume_name.clone());

        let spec = ContainerSpec {
            name: payload.instance_name.clone(),
            image: payload.longhorn_image.clone(),
            command,
            binds: vec!["/dev:/host/dev".to_string(), "/proc:/host/proc".to_string()],
            privileged: true,
            ..Default::default()
        };
        let mut instance = self.launch(&spec, InstanceType::Controller).await?;
        instance.address = format!("http://{}:{CONTROLLER_PORT}", instance.address);

        // Readiness failures leave the container running.
        let api_url = format!("{}/v1", instance.address);
        self.probe
            .wait_for_http(&api_url, self.config.wait_api_timeout)
            .await
            .map_err(|e| {
                OrcError::from(e).context(format!("fail to wait for api endpoint at {api_url}"))
            })?;
        let device = self.config.device_root.join(&payload.volume_name);
        self.probe
            .wait_for_path(&device, self.config.wait_device_timeout)
            .await
            .map_err(|e| {
                OrcError::from(e).context(format!("fail to wait for device {}", device.display()))
            })?;

        info!(instance_id = %instance.id, address = %instance.address, "Controller ready");
        Ok(instance)
    }

    #[instrument(skip(self, payload), fields(instance = %payload.instance_name, volume = %payload.volume_name))]
    async fn create_replica(&self, payload: &CreateReplicaPayload) -> Result<InstanceInfo> {
        let command = vec![
            "launch".to_string(),
            "replica".to_string(),
            "--listen".to_string(),
            format!("0.0.0.0:{REPLICA_PORT}"),
            "--size".to_string(),
            payload.volume_size.to_string(),
            REPLICA_DATA_PATH.to_string(),
        ];

        let spec = ContainerSpec {
            name: payload.instance_name.clone(),
            image: payload.longhorn_image.clone(),
            command,
            volumes: vec![REPLICA_DATA_PATH.to_string()],
            privileged: true,
            exposed_ports: REPLICA_PORTS.to_vec(),
            ..Default::default()
        };
        let instance = self.launch(&spec, InstanceType::Replica).await?;
        info!(instance_id = %instance.id, address = %instance.address, "Replica running");
        Ok(instance)
    }

    /// Create a container, then start and inspect it. A container that fails
    /// either step is removed before the error is returned.
    async fn launch(&self, spec: &ContainerSpec, instance_type: InstanceType) -> Result<InstanceInfo> {
        let id = self
            .runtime
            .create(spec)
            .await
            .map_err(|e| OrcError::runtime("create container", &spec.name, e))?;
        info!(instance_id = %id, name = %spec.name, instance_type = %instance_type, "Container created");

        match self.start_instance(&id, instance_type).await {
            Ok(instance) => Ok(instance),
            Err(start_err) => {
                warn!(instance_id = %id, error = %start_err, "Container failed to start, removing it");
                if let Err(cleanup_err) = self.remove_instance(&id, instance_type).await {
                    error!(
                        instance_id = %id,
                        error = %cleanup_err,
                        "Failed to remove container after failed start"
                    );
                }
                Err(start_err)
            }
        }
    }

    async fn start_instance(&self, id: &str, instance_type: InstanceType) -> Result<InstanceInfo> {
        self.runtime
            .start(id)
            .await
            .map_err(|e| OrcError::runtime("start container", id, e))?;
        info!(instance_id = %id, instance_type = %instance_type, "Instance started");
        self.instance_info(id, instance_type).await
    }

    async fn stop_instance(&self, id: &str, instance_type: InstanceType) -> Result<InstanceInfo> {
        self.runtime
            .stop(id, self.config.container_stop_timeout)
            .await
            .map_err(|e| OrcError::runtime("stop container", id, e))?;
        info!(instance_id = %id, instance_type = %instance_type, "Instance stopped");
        self.instance_info(id, instance_type).await
    }

    async fn remove_instance(&self, id: &str, instance_type: InstanceType) -> Result<InstanceInfo> {
        self.runtime
            .remove(id, true)
            .await
            .map_err(|e| OrcError::runtime("remove container", id, e))?;
        info!(instance_id = %id, instance_type = %instance_type, "Instance removed");
        Ok(InstanceInfo::removed(id, instance_type))
    }

    /// Derive the instance record from a live inspection.
    async fn instance_info(&self, id: &str, instance_type: InstanceType) -> Result<InstanceInfo> {
        let state = self
            .runtime
            .inspect(id)
            .await
            .map_err(|e| OrcError::runtime("inspect container", id, e))?;
        let name = state
            .name
            .strip_prefix('/')
            .unwrap_or(&state.name)
            .to_string();
        Ok(InstanceInfo {
            id: state.id,
            instance_type,
            name,
            host_id: self.host.uuid.clone(),
            address: state.ip_address,
            running: state.running,
        })
    }
}

#[async_trait]
impl ScheduleHandler for LocalExecutor {
    async fn process_schedule(&self, request: ScheduleRequest) -> Result<InstanceInfo> {
        if request.data.orchestrator != ORCHESTRATOR_KIND {
            return Err(OrcError::WrongOrchestrator(request.data.orchestrator));
        }
        let id = request.instance.id.as_str();
        if id.is_empty() {
            return Err(OrcError::InvalidArgument(
                "schedule request has an empty instance ID".to_string(),
            ));
        }

        info!(action = %request.action, instance_id = %id, "Processing schedule request");
        let instance_type = request.instance.instance_type;
        match request.payload()? {
            ActionPayload::CreateController(payload) => self.create_controller(&payload).await,
            ActionPayload::CreateReplica(payload) => self.create_replica(&payload).await,
            ActionPayload::StartInstance => self.start_instance(id, instance_type).await,
            ActionPayload::StopInstance => self.stop_instance(id, instance_type).await,
            ActionPayload::DeleteInstance => self.remove_instance(id, instance_type).await,
        }
    }
}
