//! Schedule routing.
//!
//! Routing and execution are separate seams:
//! - [`Scheduler`] is what the engine calls with a request
//! - [`ScheduleHandler`] executes a request on the host that owns it
//! - [`ScheduleTransport`] carries a request to another host
//!
//! [`HostScheduler`] places requests without a host, then either runs them
//! through the local handler or forwards them to the owning host.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lhorc_types::{HostInfo, InstanceInfo, ScheduleRequest};
use rand::seq::IndexedRandom;
use tracing::{debug, error, info};

use crate::api::ErrorBody;
use crate::error::{OrcError, Result};
use crate::store::MetadataStore;

/// Routes a request to the host that must execute it.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, request: ScheduleRequest) -> Result<InstanceInfo>;
}

/// Executes a request routed to this host.
#[async_trait]
pub trait ScheduleHandler: Send + Sync {
    async fn process_schedule(&self, request: ScheduleRequest) -> Result<InstanceInfo>;
}

/// Delivers a request to another host.
#[async_trait]
pub trait ScheduleTransport: Send + Sync {
    async fn forward(&self, host: &HostInfo, request: &ScheduleRequest) -> Result<InstanceInfo>;
}

/// Transport that posts requests to the peer agent's API.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        // Controller creation blocks on two readiness waits on the far side.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| OrcError::Connectivity(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScheduleTransport for HttpTransport {
    async fn forward(&self, host: &HostInfo, request: &ScheduleRequest) -> Result<InstanceInfo> {
        let url = format!("http://{}/v1/schedule", host.address);
        debug!(
            url = %url,
            host_id = %host.uuid,
            action = %request.action,
            instance_id = %request.instance.id,
            "Forwarding schedule request"
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| OrcError::Connectivity(format!("failed to reach host {}: {e}", host.uuid)))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<InstanceInfo>().await.map_err(|e| {
                OrcError::Connectivity(format!("invalid response from host {}: {e}", host.uuid))
            });
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(remote) => Err(OrcError::Remote {
                host: host.uuid.clone(),
                kind: remote.code,
                message: remote.message,
            }),
            Err(_) => {
                error!(status = %status, body = %body, host_id = %host.uuid, "Unexpected response from host");
                Err(OrcError::Connectivity(format!(
                    "host {} answered {status}: {body}",
                    host.uuid
                )))
            }
        }
    }
}

/// Scheduler that places by host ID and dispatches locally or remotely.
pub struct HostScheduler {
    host: Arc<HostInfo>,
    store: MetadataStore,
    local: Arc<dyn ScheduleHandler>,
    transport: Arc<dyn ScheduleTransport>,
}

impl HostScheduler {
    pub fn new(
        host: Arc<HostInfo>,
        store: MetadataStore,
        local: Arc<dyn ScheduleHandler>,
        transport: Arc<dyn ScheduleTransport>,
    ) -> Self {
        Self {
            host,
            store,
            local,
            transport,
        }
    }

    /// Pick a registered host uniformly at random.
    async fn place(&self) -> Result<String> {
        let hosts = self
            .store
            .list_hosts()
            .await
            .map_err(|e| OrcError::store("list", "hosts", e))?;
        let chosen = {
            let mut rng = rand::rng();
            hosts.choose(&mut rng).map(|h| h.uuid.clone())
        };
        chosen.ok_or_else(|| OrcError::not_found("host", "for placement"))
    }
}

#[async_trait]
impl Scheduler for HostScheduler {
    async fn schedule(&self, mut request: ScheduleRequest) -> Result<InstanceInfo> {
        if request.instance.host_id.is_empty() {
            request.instance.host_id = self.place().await?;
            info!(
                instance_id = %request.instance.id,
                host_id = %request.instance.host_id,
                "Placed instance"
            );
        }

        if request.instance.host_id == self.host.uuid {
            return self.local.process_schedule(request).await;
        }

        let host_id = request.instance.host_id.clone();
        let host = self
            .store
            .get_host(&host_id)
            .await
            .map_err(|e| OrcError::store("get", self.store.host_key(&host_id), e))?
            .ok_or_else(|| OrcError::not_found("host", host_id))?;
        self.transport.forward(&host, &request).await
    }
}

#[cfg(test)]
mod tests {
    use lhorc_types::{InstanceType, ScheduleAction, ScheduleData, ScheduleInstance};
    use tokio::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorKind;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<ScheduleRequest>>,
    }

    #[async_trait]
    impl ScheduleHandler for RecordingHandler {
        async fn process_schedule(&self, request: ScheduleRequest) -> Result<InstanceInfo> {
            let info = InstanceInfo {
                id: request.instance.id.clone(),
                host_id: request.instance.host_id.clone(),
                ..Default::default()
            };
            self.seen.lock().await.push(request);
            Ok(info)
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<(String, ScheduleRequest)>>,
    }

    #[async_trait]
    impl ScheduleTransport for RecordingTransport {
        async fn forward(&self, host: &HostInfo, request: &ScheduleRequest) -> Result<InstanceInfo> {
            self.seen
                .lock()
                .await
                .push((host.uuid.clone(), request.clone()));
            Ok(InstanceInfo {
                id: request.instance.id.clone(),
                host_id: host.uuid.clone(),
                ..Default::default()
            })
        }
    }

    fn host(uuid: &str, address: &str) -> HostInfo {
        HostInfo {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            address: address.to_string(),
        }
    }

    fn request(host_id: &str) -> ScheduleRequest {
        ScheduleRequest {
            action: ScheduleAction::StartInstance,
            instance: ScheduleInstance {
                id: "c1".to_string(),
                instance_type: InstanceType::Controller,
                host_id: host_id.to_string(),
            },
            data: ScheduleData::empty("docker"),
        }
    }

    struct Fixture {
        scheduler: HostScheduler,
        local: Arc<RecordingHandler>,
        transport: Arc<RecordingTransport>,
        store: MetadataStore,
    }

    fn fixture() -> Fixture {
        let store = MetadataStore::in_memory("/longhorn");
        let local = Arc::new(RecordingHandler::default());
        let transport = Arc::new(RecordingTransport::default());
        let scheduler = HostScheduler::new(
            Arc::new(host("h1", "10.0.0.1:9500")),
            store.clone(),
            local.clone(),
            transport.clone(),
        );
        Fixture {
            scheduler,
            local,
            transport,
            store,
        }
    }

    #[tokio::test]
    async fn test_local_host_dispatches_locally() {
        let f = fixture();
        let info = f.scheduler.schedule(request("h1")).await.unwrap();
        assert_eq!(info.host_id, "h1");
        assert_eq!(f.local.seen.lock().await.len(), 1);
        assert!(f.transport.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_remote_host_forwards() {
        let f = fixture();
        f.store.set_host(&host("h2", "10.0.0.2:9500")).await.unwrap();

        let info = f.scheduler.schedule(request("h2")).await.unwrap();
        assert_eq!(info.host_id, "h2");
        let seen = f.transport.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "h2");
        assert!(f.local.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_host_not_found() {
        let f = fixture();
        let err = f.scheduler.schedule(request("ghost")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_empty_host_placed_on_registered_host() {
        let f = fixture();
        f.store.set_host(&host("h1", "10.0.0.1:9500")).await.unwrap();

        let info = f.scheduler.schedule(request("")).await.unwrap();
        assert_eq!(info.host_id, "h1");
        assert_eq!(f.local.seen.lock().await[0].instance.host_id, "h1");
    }

    #[tokio::test]
    async fn test_no_hosts_to_place_on() {
        let f = fixture();
        let err = f.scheduler.schedule(request("")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_http_transport_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/schedule"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "c1",
                "type": "controller",
                "name": "c1",
                "host_id": "h2",
                "address": "http://10.0.0.6:9501",
                "running": true
            })))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let peer = host("h2", &server.address().to_string());
        let info = transport.forward(&peer, &request("h2")).await.unwrap();
        assert_eq!(info.address, "http://10.0.0.6:9501");
        assert!(info.running);
    }

    #[tokio::test]
    async fn test_http_transport_rebuilds_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/schedule"))
            .respond_with(ResponseTemplate::new(504).set_body_json(serde_json::json!({
                "code": "readiness_timeout",
                "message": "timed out waiting for /dev/longhorn/vol1"
            })))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let peer = host("h2", &server.address().to_string());
        let err = transport.forward(&peer, &request("h2")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadinessTimeout);
        assert!(err.to_string().contains("/dev/longhorn/vol1"));
    }

    #[tokio::test]
    async fn test_http_transport_unreachable() {
        let transport = HttpTransport::new().unwrap();
        let peer = host("h2", "127.0.0.1:1");
        let err = transport.forward(&peer, &request("h2")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectivityFailure);
    }
}
