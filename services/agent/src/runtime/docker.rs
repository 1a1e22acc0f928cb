//! Docker Engine API client.
//!
//! Speaks API version 1.24 over the daemon's Unix socket.
//!
//! Reference: https://docs.docker.com/engine/api/v1.24/

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

const API_VERSION: &str = "v1.24";

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig<'a> {
    binds: &'a [String],
    privileged: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerBody<'a> {
    image: &'a str,
    cmd: &'a [String],
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<&'a str, Empty>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    exposed_ports: BTreeMap<String, Empty>,
    host_config: HostConfig<'a>,
}

impl<'a> CreateContainerBody<'a> {
    fn from_spec(spec: &'a ContainerSpec) -> Self {
        Self {
            image: &spec.image,
            cmd: &spec.command,
            volumes: spec.volumes.iter().map(|v| (v.as_str(), Empty {})).collect(),
            exposed_ports: spec
                .exposed_ports
                .iter()
                .map(|p| (format!("{p}/tcp"), Empty {}))
                .collect(),
            host_config: HostConfig {
                binds: &spec.binds,
                privileged: spec.privileged,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    id: String,
    name: String,
    state: InspectState,
    #[serde(default)]
    network_settings: InspectNetwork,
}

impl From<InspectResponse> for ContainerState {
    fn from(inspect: InspectResponse) -> Self {
        Self {
            id: inspect.id,
            name: inspect.name,
            ip_address: inspect.network_settings.ip_address,
            running: inspect.state.running,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

/// Docker runtime over the Engine API Unix socket.
pub struct DockerRuntime {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerRuntime {
    /// Create a client for the daemon listening on `socket_path`.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            client,
        }
    }

    /// Check if the socket exists.
    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// Perform a request and return the status and body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), RuntimeError> {
        let uri = Uri::new(&self.socket_path, &format!("/{API_VERSION}{path}"));
        debug!(method = %method, path = path, "Docker API request");

        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json");
        let request = match body {
            Some(bytes) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(bytes))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await?;
        Ok((status, body))
    }

    /// Map a failed response to an error, treating 404 as a missing container.
    fn api_error(id: &str, status: StatusCode, body: &Bytes) -> RuntimeError {
        let message = serde_json::from_slice::<ApiMessage>(body)
            .map(|m| m.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string());
        if status == StatusCode::NOT_FOUND && !id.is_empty() {
            return RuntimeError::NotFound(id.to_string());
        }
        error!(status = %status, message = %message, "Docker API error");
        RuntimeError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

fn create_path(name: &str) -> String {
    format!("/containers/create?name={}", urlencoding::encode(name))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        let (status, body) = self.request(Method::GET, "/containers/json", None).await?;
        if !status.is_success() {
            return Err(Self::api_error("", status, &body));
        }
        let containers: Vec<serde_json::Value> = serde_json::from_slice(&body)?;
        debug!(count = containers.len(), "Docker answered container list");
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let body = serde_json::to_vec(&CreateContainerBody::from_spec(spec))?;
        let path = create_path(&spec.name);
        let (status, response) = self.request(Method::POST, &path, Some(body)).await?;
        if !status.is_success() {
            return Err(Self::api_error("", status, &response));
        }
        let created: CreateContainerResponse = serde_json::from_slice(&response)?;
        info!(name = %spec.name, id = %created.id, image = %spec.image, "Container created");
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let path = format!("/containers/{id}/start");
        let (status, body) = self.request(Method::POST, &path, None).await?;
        // 304: already running
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        Err(Self::api_error(id, status, &body))
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let path = format!("/containers/{id}/stop?t={}", grace.as_secs());
        let (status, body) = self.request(Method::POST, &path, None).await?;
        // 304: already stopped
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        Err(Self::api_error(id, status, &body))
    }

    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError> {
        let path = format!("/containers/{id}?v={remove_volumes}");
        let (status, body) = self.request(Method::DELETE, &path, None).await?;
        if status.is_success() {
            return Ok(());
        }
        Err(Self::api_error(id, status, &body))
    }

    async fn inspect(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let path = format!("/containers/{id}/json");
        let (status, body) = self.request(Method::GET, &path, None).await?;
        if !status.is_success() {
            return Err(Self::api_error(id, status, &body));
        }
        let inspect: InspectResponse = serde_json::from_slice(&body)?;
        Ok(inspect.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_path_encodes_name() {
        assert_eq!(create_path("vol1-r-1a2b"), "/containers/create?name=vol1-r-1a2b");
        assert_eq!(
            create_path("r 1&x#y"),
            "/containers/create?name=r%201%26x%23y"
        );
    }

    #[test]
    fn test_create_body_for_replica() {
        let spec = ContainerSpec {
            name: "r1".to_string(),
            image: "longhornio/engine:v1".to_string(),
            command: vec!["launch".to_string(), "replica".to_string()],
            binds: vec![],
            volumes: vec!["/volume".to_string()],
            privileged: true,
            exposed_ports: vec![9502, 9503, 9504],
        };

        let body = serde_json::to_value(CreateContainerBody::from_spec(&spec)).unwrap();
        assert_eq!(body["Image"], "longhornio/engine:v1");
        assert_eq!(body["Cmd"], serde_json::json!(["launch", "replica"]));
        assert_eq!(body["Volumes"], serde_json::json!({"/volume": {}}));
        assert_eq!(
            body["ExposedPorts"],
            serde_json::json!({"9502/tcp": {}, "9503/tcp": {}, "9504/tcp": {}})
        );
        assert_eq!(body["HostConfig"]["Privileged"], true);
        assert_eq!(body["HostConfig"]["Binds"], serde_json::json!([]));
    }

    #[test]
    fn test_create_body_for_controller_omits_empty_maps() {
        let spec = ContainerSpec {
            name: "c1".to_string(),
            image: "img".to_string(),
            binds: vec!["/dev:/host/dev".to_string(), "/proc:/host/proc".to_string()],
            privileged: true,
            ..Default::default()
        };

        let body = serde_json::to_value(CreateContainerBody::from_spec(&spec)).unwrap();
        assert!(body.get("Volumes").is_none());
        assert!(body.get("ExposedPorts").is_none());
        assert_eq!(
            body["HostConfig"]["Binds"],
            serde_json::json!(["/dev:/host/dev", "/proc:/host/proc"])
        );
    }

    #[test]
    fn test_inspect_response_parsing() {
        let raw = serde_json::json!({
            "Id": "abc123",
            "Name": "/r1",
            "State": {"Running": true, "Pid": 42},
            "NetworkSettings": {"IPAddress": "172.17.0.3"},
            "Config": {"Image": "img"}
        });
        let inspect: InspectResponse = serde_json::from_value(raw).unwrap();
        let state = ContainerState::from(inspect);
        assert_eq!(state.id, "abc123");
        assert_eq!(state.name, "/r1");
        assert_eq!(state.ip_address, "172.17.0.3");
        assert!(state.running);
    }

    #[test]
    fn test_api_error_maps_not_found() {
        let body = Bytes::from_static(br#"{"message":"No such container: x"}"#);
        let err = DockerRuntime::api_error("x", StatusCode::NOT_FOUND, &body);
        assert!(matches!(err, RuntimeError::NotFound(id) if id == "x"));

        let err = DockerRuntime::api_error("", StatusCode::CONFLICT, &body);
        match err {
            RuntimeError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "No such container: x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_socket_fails() {
        let runtime = DockerRuntime::new("/nonexistent/docker.sock");
        assert!(!runtime.socket_exists());
        assert!(runtime.ping().await.is_err());
    }
}
