//! Public lifecycle operations.
//!
//! The orchestrator owns the volume records in the metadata store and turns
//! instance operations into schedule requests. It never touches containers
//! itself: every instance action goes through the scheduler, which runs it
//! here or on the owning host.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use lhorc_types::{
    ControllerInfo, CreateControllerPayload, CreateReplicaPayload, HostInfo, InstanceInfo,
    InstanceType, ReplicaInfo, ScheduleAction, ScheduleData, ScheduleInstance, ScheduleRequest,
    SettingsInfo, VolumeInfo,
};
use tracing::{debug, info, instrument};

use crate::config::ExecutorConfig;
use crate::error::{ErrorContext, OrcError, Result};
use crate::executor::{LocalExecutor, ORCHESTRATOR_KIND, REPLICA_PORT};
use crate::identity;
use crate::probe::ReadinessProbe;
use crate::runtime::ContainerRuntime;
use crate::scheduler::{HostScheduler, ScheduleHandler, ScheduleTransport, Scheduler};
use crate::store::{MetadataStore, StoreError};

/// Lifecycle operations of one host agent.
pub struct Orchestrator {
    host: Arc<HostInfo>,
    store: MetadataStore,
    executor: Arc<dyn ScheduleHandler>,
    scheduler: Arc<dyn Scheduler>,
    longhorn_image: String,
}

impl Orchestrator {
    pub fn new(
        host: Arc<HostInfo>,
        store: MetadataStore,
        executor: Arc<dyn ScheduleHandler>,
        scheduler: Arc<dyn Scheduler>,
        longhorn_image: impl Into<String>,
    ) -> Self {
        Self {
            host,
            store,
            executor,
            scheduler,
            longhorn_image: longhorn_image.into(),
        }
    }

    /// Wire a local executor over `runtime` behind a host scheduler.
    pub fn with_runtime(
        host: Arc<HostInfo>,
        store: MetadataStore,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn ReadinessProbe>,
        config: ExecutorConfig,
        transport: Arc<dyn ScheduleTransport>,
        longhorn_image: impl Into<String>,
    ) -> Self {
        let executor: Arc<dyn ScheduleHandler> =
            Arc::new(LocalExecutor::new(host.clone(), runtime, probe, config));
        let scheduler = Arc::new(HostScheduler::new(
            host.clone(),
            store.clone(),
            executor.clone(),
            transport,
        ));
        Self::new(host, store, executor, scheduler, longhorn_image)
    }

    /// Resolve this host's identity and publish it to the store.
    ///
    /// Must succeed before the orchestrator is built.
    pub async fn register_host(
        store: &MetadataStore,
        config_dir: &Path,
        address: &str,
    ) -> Result<Arc<HostInfo>> {
        let host = identity::load_or_create_host(config_dir, address)?;
        store
            .set_host(&host)
            .await
            .map_err(|e| OrcError::store("register", store.host_key(&host.uuid), e))?;
        info!(host_id = %host.uuid, name = %host.name, address = %host.address, "Host registered");
        Ok(Arc::new(host))
    }

    /// The local executor, for serving requests forwarded by peers.
    pub fn handler(&self) -> Arc<dyn ScheduleHandler> {
        self.executor.clone()
    }

    // -------------------------------------------------------------------------
    // Hosts
    // -------------------------------------------------------------------------

    pub fn current_host_id(&self) -> &str {
        &self.host.uuid
    }

    pub async fn get_host(&self, id: &str) -> Result<Option<HostInfo>> {
        self.store
            .get_host(id)
            .await
            .map_err(|e| OrcError::store("get", self.store.host_key(id), e))
    }

    pub async fn list_hosts(&self) -> Result<BTreeMap<String, HostInfo>> {
        let hosts = self
            .store
            .list_hosts()
            .await
            .map_err(|e| OrcError::store("list", "hosts", e))?;
        Ok(hosts.into_iter().map(|h| (h.uuid.clone(), h)).collect())
    }

    /// API address of a host. The local host is answered without a store read.
    pub async fn get_address(&self, host_id: &str) -> Result<String> {
        if host_id == self.host.uuid {
            return Ok(self.host.address.clone());
        }
        self.get_host(host_id)
            .await?
            .map(|h| h.address)
            .ok_or_else(|| OrcError::not_found("host", host_id))
    }

    // -------------------------------------------------------------------------
    // Volumes
    // -------------------------------------------------------------------------

    pub async fn create_volume(&self, volume: VolumeInfo) -> Result<VolumeInfo> {
        match self.store.create_volume(&volume).await {
            Ok(()) => {
                info!(volume = %volume.name, size = volume.size, "Volume created");
                Ok(volume)
            }
            Err(StoreError::Conflict(_)) => Err(OrcError::already_exists("volume", &volume.name)),
            Err(e) => Err(OrcError::store("create", self.store.volume_key(&volume.name), e)
                .context("fail to create new volume metadata")),
        }
    }

    /// Replace a stored volume record. Last writer wins.
    pub async fn update_volume(&self, volume: &VolumeInfo) -> Result<()> {
        if self.get_volume(&volume.name).await?.is_none() {
            return Err(OrcError::not_found("volume", &volume.name)
                .context(format!("cannot update volume {}", volume.name)));
        }
        self.store
            .set_volume(volume)
            .await
            .map_err(|e| OrcError::store("update", self.store.volume_key(&volume.name), e))
    }

    pub async fn delete_volume(&self, name: &str) -> Result<()> {
        let existed = self
            .store
            .delete_volume(name)
            .await
            .map_err(|e| OrcError::store("delete", self.store.volume_key(name), e))?;
        if !existed {
            return Err(OrcError::not_found("volume", name));
        }
        info!(volume = %name, "Volume deleted");
        Ok(())
    }

    pub async fn get_volume(&self, name: &str) -> Result<Option<VolumeInfo>> {
        self.store
            .get_volume(name)
            .await
            .map_err(|e| OrcError::store("get", self.store.volume_key(name), e))
    }

    pub async fn list_volumes(&self) -> Result<Vec<VolumeInfo>> {
        self.store
            .list_volumes()
            .await
            .map_err(|e| OrcError::store("list", "volumes", e))
    }

    /// Stamp the named replica of a volume as bad.
    ///
    /// A replica name that is not part of the volume leaves the record as is.
    pub async fn mark_bad_replica(&self, volume_name: &str, replica: &ReplicaInfo) -> Result<()> {
        let name = replica.instance.name.as_str();
        let mut marked = false;
        let updated = self
            .store
            .update_volume_with(volume_name, |volume| {
                marked = false;
                if let Some(key) = volume.replica_key(name).map(str::to_string) {
                    if let Some(entry) = volume.replicas.get_mut(&key) {
                        entry.bad_timestamp = Some(Utc::now());
                        marked = true;
                    }
                }
            })
            .await
            .map_err(|e| {
                OrcError::store("update", self.store.volume_key(volume_name), e)
                    .context("fail to mark bad replica")
            })?;

        if updated.is_none() {
            return Err(OrcError::not_found("volume", volume_name).context("fail to mark bad replica"));
        }
        if marked {
            info!(volume = %volume_name, replica = %name, "Replica marked bad");
        } else {
            debug!(volume = %volume_name, replica = %name, "Replica not in volume, nothing to mark");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    /// Create the controller of a volume on this host.
    #[instrument(skip(self, replicas), fields(replicas = replicas.len()))]
    pub async fn create_controller(
        &self,
        volume_name: &str,
        controller_name: &str,
        replicas: &BTreeMap<String, ReplicaInfo>,
    ) -> Result<ControllerInfo> {
        let result = async {
            let volume = self.schedulable_volume(volume_name).await?;
            let payload = CreateControllerPayload {
                instance_name: controller_name.to_string(),
                volume_name: volume.name.clone(),
                longhorn_image: volume.longhorn_image.clone(),
                replica_addresses: replicas
                    .values()
                    .map(|r| format!("tcp://{}:{REPLICA_PORT}", r.instance.address))
                    .collect(),
            };
            let request = ScheduleRequest {
                action: ScheduleAction::CreateController,
                instance: ScheduleInstance {
                    id: controller_name.to_string(),
                    instance_type: InstanceType::Controller,
                    host_id: self.host.uuid.clone(),
                },
                data: encode(&payload)?,
            };
            self.scheduler.schedule(request).await
        }
        .await;

        result
            .map(ControllerInfo::from)
            .with_context(|| format!("fail to create controller for {volume_name}"))
    }

    /// Create a replica of a volume on a host chosen by the scheduler.
    #[instrument(skip(self))]
    pub async fn create_replica(&self, volume_name: &str, replica_name: &str) -> Result<ReplicaInfo> {
        let result = async {
            let volume = self.schedulable_volume(volume_name).await?;
            let payload = CreateReplicaPayload {
                instance_name: replica_name.to_string(),
                volume_name: volume.name.clone(),
                volume_size: volume.size,
                longhorn_image: volume.longhorn_image.clone(),
            };
            let request = ScheduleRequest {
                action: ScheduleAction::CreateReplica,
                instance: ScheduleInstance {
                    id: replica_name.to_string(),
                    instance_type: InstanceType::Replica,
                    host_id: String::new(),
                },
                data: encode(&payload)?,
            };
            self.scheduler.schedule(request).await
        }
        .await;

        result
            .map(ReplicaInfo::from)
            .with_context(|| format!("fail to create replica for {volume_name}"))
    }

    pub async fn start_instance(&self, instance: &InstanceInfo) -> Result<InstanceInfo> {
        self.lifecycle(ScheduleAction::StartInstance, "start", instance)
            .await
    }

    pub async fn stop_instance(&self, instance: &InstanceInfo) -> Result<InstanceInfo> {
        self.lifecycle(ScheduleAction::StopInstance, "stop", instance)
            .await
    }

    pub async fn remove_instance(&self, instance: &InstanceInfo) -> Result<InstanceInfo> {
        self.lifecycle(ScheduleAction::DeleteInstance, "remove", instance)
            .await
    }

    /// Execute a request routed to this host.
    pub async fn process_schedule(&self, request: ScheduleRequest) -> Result<InstanceInfo> {
        self.executor.process_schedule(request).await
    }

    async fn lifecycle(
        &self,
        action: ScheduleAction,
        verb: &str,
        instance: &InstanceInfo,
    ) -> Result<InstanceInfo> {
        if instance.id.is_empty()
            || instance.host_id.is_empty()
            || instance.instance_type == InstanceType::None
        {
            return Err(OrcError::InvalidArgument(format!(
                "invalid instance info to {verb}: id={:?} host_id={:?} type={}",
                instance.id, instance.host_id, instance.instance_type
            )));
        }

        let request = ScheduleRequest {
            action,
            instance: ScheduleInstance {
                id: instance.id.clone(),
                instance_type: instance.instance_type,
                host_id: instance.host_id.clone(),
            },
            data: ScheduleData::empty(ORCHESTRATOR_KIND),
        };
        self.scheduler
            .schedule(request)
            .await
            .with_context(|| format!("fail to {verb} instance {}", instance.id))
    }

    /// Load a volume that instances can be created for.
    async fn schedulable_volume(&self, name: &str) -> Result<VolumeInfo> {
        let volume = self
            .get_volume(name)
            .await?
            .ok_or_else(|| OrcError::not_found("volume", name))?;
        if volume.size == 0 {
            return Err(OrcError::InvalidArgument(format!(
                "invalid volume size 0 for volume {name}"
            )));
        }
        Ok(volume)
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    /// Stored settings, or the defaults when none were ever set.
    pub async fn get_settings(&self) -> Result<SettingsInfo> {
        let settings = self
            .store
            .get_settings()
            .await
            .map_err(|e| OrcError::store("get", self.store.settings_key(), e))?;
        Ok(settings.unwrap_or_else(|| SettingsInfo::with_default_target(&self.longhorn_image)))
    }

    pub async fn set_settings(&self, settings: &SettingsInfo) -> Result<()> {
        self.store
            .set_settings(settings)
            .await
            .map_err(|e| OrcError::store("set", self.store.settings_key(), e))
    }
}

fn encode<T: serde::Serialize>(payload: &T) -> Result<ScheduleData> {
    ScheduleData::with_payload(ORCHESTRATOR_KIND, payload)
        .map_err(|e| OrcError::InvalidArgument(format!("unable to encode schedule payload: {e}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lhorc_types::DEFAULT_BACKUP_TARGET;
    use rstest::rstest;

    use super::*;
    use crate::error::ErrorKind;
    use crate::probe::PollingProbe;
    use crate::runtime::MockRuntime;
    use crate::scheduler::HttpTransport;

    const IMAGE: &str = "rancher/longhorn:latest";

    fn orchestrator() -> (Orchestrator, MetadataStore) {
        let host = Arc::new(HostInfo {
            uuid: "h1".to_string(),
            name: "node-1".to_string(),
            address: "10.0.0.1:9500".to_string(),
        });
        let store = MetadataStore::in_memory("/longhorn");
        let orc = Orchestrator::with_runtime(
            host,
            store.clone(),
            Arc::new(MockRuntime::new()),
            Arc::new(PollingProbe::new(Duration::from_millis(10)).unwrap()),
            ExecutorConfig::default(),
            Arc::new(HttpTransport::new().unwrap()),
            IMAGE,
        );
        (orc, store)
    }

    #[tokio::test]
    async fn test_register_host_publishes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::in_memory("/longhorn");

        let host = Orchestrator::register_host(&store, dir.path(), "10.0.0.1:9500")
            .await
            .unwrap();
        assert_eq!(store.get_host(&host.uuid).await.unwrap().as_ref(), Some(&*host));

        let again = Orchestrator::register_host(&store, dir.path(), "10.0.0.1:9500")
            .await
            .unwrap();
        assert_eq!(again.uuid, host.uuid);
        assert_eq!(store.list_hosts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settings_default_not_persisted() {
        let (orc, store) = orchestrator();
        let settings = orc.get_settings().await.unwrap();
        assert_eq!(settings.backup_target, DEFAULT_BACKUP_TARGET);
        assert_eq!(settings.longhorn_image, IMAGE);
        assert!(store.get_settings().await.unwrap().is_none());

        let custom = SettingsInfo {
            backup_target: "s3://backups@us-east-1/".to_string(),
            longhorn_image: "longhornio/engine:v2".to_string(),
        };
        orc.set_settings(&custom).await.unwrap();
        assert_eq!(orc.get_settings().await.unwrap(), custom);
    }

    #[tokio::test]
    async fn test_get_address() {
        let (orc, store) = orchestrator();
        assert_eq!(orc.current_host_id(), "h1");
        assert_eq!(orc.get_address("h1").await.unwrap(), "10.0.0.1:9500");

        store
            .set_host(&HostInfo {
                uuid: "h2".to_string(),
                name: "node-2".to_string(),
                address: "10.0.0.2:9500".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(orc.get_address("h2").await.unwrap(), "10.0.0.2:9500");
        assert_eq!(orc.list_hosts().await.unwrap().len(), 1);

        let err = orc.get_address("h3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[rstest]
    #[case::empty_id("", "h1", InstanceType::Replica)]
    #[case::empty_host("r1", "", InstanceType::Replica)]
    #[case::no_type("r1", "h1", InstanceType::None)]
    #[tokio::test]
    async fn test_lifecycle_rejects_incomplete_instance(
        #[case] id: &str,
        #[case] host_id: &str,
        #[case] instance_type: InstanceType,
    ) {
        let (orc, _) = orchestrator();
        let instance = InstanceInfo {
            id: id.to_string(),
            host_id: host_id.to_string(),
            instance_type,
            ..Default::default()
        };
        for result in [
            orc.start_instance(&instance).await,
            orc.stop_instance(&instance).await,
            orc.remove_instance(&instance).await,
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
        }
    }

    #[tokio::test]
    async fn test_delete_missing_volume() {
        let (orc, _) = orchestrator();
        let err = orc.delete_volume("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_mark_bad_replica_missing_volume() {
        let (orc, _) = orchestrator();
        let replica = ReplicaInfo::from(InstanceInfo {
            name: "r1".to_string(),
            ..Default::default()
        });
        let err = orc.mark_bad_replica("ghost", &replica).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
