//! etcd v2 keys API backend.
//!
//! Reference: https://etcd.io/docs/v2.3/api/

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{KvBackend, KvEntry, StoreError};

/// etcd error code for a missing key.
const ERR_KEY_NOT_FOUND: u64 = 100;
/// etcd error code for a failed prevIndex/prevValue comparison.
const ERR_TEST_FAILED: u64 = 101;
/// etcd error code for prevExist=false on an existing key.
const ERR_NODE_EXIST: u64 = 105;

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Node,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    modified_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: u64,
    #[serde(default)]
    message: String,
}

/// Backend talking to an etcd cluster through its v2 HTTP API.
pub struct EtcdBackend {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl EtcdBackend {
    /// Create a backend over the given endpoints, tried in order.
    pub fn new(endpoints: Vec<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(1))
            .timeout(Duration::from_secs(5))
            .build()?;
        let endpoints = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();
        Ok(Self { client, endpoints })
    }

    /// Send a request to the first endpoint that accepts the connection.
    async fn send<F>(&self, method: Method, key: &str, build: F) -> Result<Response, StoreError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            let url = format!("{endpoint}/v2/keys{key}");
            debug!(method = %method, url = %url, "etcd request");
            match build(self.client.request(method.clone(), &url)).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(endpoint = %endpoint, error = %e, "etcd endpoint unreachable");
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Unavailable(
            last_error.unwrap_or_else(|| "no endpoints configured".to_string()),
        ))
    }

    /// Translate a non-success response into a store error.
    async fn failure(key: &str, response: Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) if matches!(err.error_code, ERR_TEST_FAILED | ERR_NODE_EXIST) => {
                StoreError::Conflict(key.to_string())
            }
            Ok(err) => StoreError::Backend {
                status: status.as_u16(),
                message: err.message,
            },
            Err(_) if status == StatusCode::PRECONDITION_FAILED => {
                StoreError::Conflict(key.to_string())
            }
            Err(_) => StoreError::Backend {
                status: status.as_u16(),
                message: body,
            },
        }
    }

    async fn put(&self, key: &str, value: &str, condition: &[(&str, String)]) -> Result<u64, StoreError> {
        let response = self
            .send(Method::PUT, key, |req| {
                req.query(condition).form(&[("value", value)])
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure(key, response).await);
        }
        let body: KeysResponse = response.json().await?;
        Ok(body.node.modified_index)
    }
}

fn is_key_not_found(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND
        && serde_json::from_str::<ErrorBody>(body)
            .map(|e| e.error_code == ERR_KEY_NOT_FOUND)
            .unwrap_or(true)
}

#[async_trait]
impl KvBackend for EtcdBackend {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        let response = self.send(Method::GET, key, |req| req).await?;
        let status = response.status();
        if status.is_success() {
            let body: KeysResponse = response.json().await?;
            return Ok(body.node.value.map(|value| KvEntry {
                value,
                index: body.node.modified_index,
            }));
        }
        let body = response.text().await.unwrap_or_default();
        if is_key_not_found(status, &body) {
            return Ok(None);
        }
        Err(StoreError::Backend {
            status: status.as_u16(),
            message: body,
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<(String, KvEntry)>, StoreError> {
        let response = self
            .send(Method::GET, dir, |req| req.query(&[("sorted", "true")]))
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_key_not_found(status, &body) {
                return Ok(Vec::new());
            }
            return Err(StoreError::Backend {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: KeysResponse = response.json().await?;
        Ok(body
            .node
            .nodes
            .into_iter()
            .filter(|n| !n.dir)
            .filter_map(|n| {
                let index = n.modified_index;
                n.value.map(|value| (n.key, KvEntry { value, index }))
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        self.put(key, value, &[]).await
    }

    async fn create(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        self.put(key, value, &[("prevExist", "false".to_string())])
            .await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        value: &str,
        index: u64,
    ) -> Result<u64, StoreError> {
        match self
            .put(key, value, &[("prevIndex", index.to_string())])
            .await
        {
            // The key vanished between read and write.
            Err(StoreError::Backend { status: 404, .. }) => {
                Err(StoreError::Conflict(key.to_string()))
            }
            other => other,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let response = self.send(Method::DELETE, key, |req| req).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        let body = response.text().await.unwrap_or_default();
        if is_key_not_found(status, &body) {
            return Ok(false);
        }
        Err(StoreError::Backend {
            status: status.as_u16(),
            message: body,
        })
    }
}
